//! This crate exposes the internal functionality of the edgescan prober.
//!
//! edgescan takes a large pool of candidate addresses, opens a TLS session
//! (or sends an HTTPS `HEAD` request) to port 443 of each of them, keeps the
//! ones whose certificate identifies a known Google frontend, and writes the
//! survivors ranked by latency.
//!
//! ## Architecture Overview
//!
//! 1. **Range expansion**: [`address`] turns single addresses, dash ranges
//!    and CIDRs into a flat list of addresses.
//! 2. **Probing**: [`Scanner`](crate::scanner::Scanner) runs one probe per
//!    address, never more than the configured concurrency at once.
//! 3. **Classification**: [`classifier`] maps certificate subjects to
//!    server tags such as `gws`.
//! 4. **Ranking**: [`ResultSink`](crate::results::ResultSink) collects
//!    accepted candidates from every probe and writes them fastest first.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use edgescan::address::expand_all;
//! use edgescan::input::{Opts, RunConfig};
//! use edgescan::results::ResultSink;
//! use edgescan::scanner::{tls::TrustStore, Scanner};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let addrs = expand_all(["142.250.0.0/28"])?;
//! let opts = Opts {
//!     server: vec!["gws".to_owned()],
//!     ..Opts::default()
//! };
//! let config = Arc::new(RunConfig::from_opts(&opts)?);
//! let trust = TrustStore::load("cacert.pem".as_ref())?;
//! let sink = ResultSink::new();
//!
//! let scanner = Scanner::new(&addrs, config, &trust, sink.clone(), true, false)?;
//! scanner.run().await;
//!
//! for candidate in sink.finalize() {
//!     println!("{} {}ms", candidate.address, candidate.latency_millis);
//! }
//! # Ok(())
//! # }
//! ```

pub mod tui;

pub mod input;

pub mod address;

pub mod classifier;

pub mod scanner;

pub mod results;
