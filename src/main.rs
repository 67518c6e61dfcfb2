#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::if_not_else, clippy::non_ascii_literal)]

use edgescan::address::read_ranges;
use edgescan::input::{Config, Opts, RunConfig};
use edgescan::results::ResultSink;
use edgescan::scanner::tls::TrustStore;
use edgescan::scanner::Scanner;
use edgescan::{detail, output, warning};

use anyhow::Context;
use itertools::Itertools;
use log::debug;
use std::future;
use std::process;
use std::sync::Arc;
use tokio::signal;

#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;

/// Reads the ranges, probes every address and writes the ranked results.
#[tokio::main]
async fn main() {
    #[cfg(windows)]
    let _ = ansi_term::enable_ansi_support();

    env_logger::init();

    if let Err(e) = run().await {
        warning!(format!("{e:#}"));
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut opts: Opts = Opts::read();
    let config = if opts.no_config {
        Config::default()
    } else {
        Config::read(&opts.config_path)?
    };
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let run_config = Arc::new(RunConfig::from_opts(&opts)?);
    let trust = TrustStore::load(&opts.cacert)?;
    let ips = read_ranges(&opts.ranges).await?;

    #[cfg(unix)]
    check_ulimit(&opts);

    detail!(
        format!("Concurrency: {}", run_config.concurrency),
        opts.greppable,
        opts.accessible
    );
    detail!(
        format!("Servers: {}", opts.server.iter().map(|s| format!("{s:?}")).join(", ")),
        opts.greppable,
        opts.accessible
    );
    if run_config.allowed_server_names.is_empty() {
        warning!(
            "No server tags are allowed, nothing will be kept.",
            opts.greppable,
            opts.accessible
        );
    }
    detail!(
        format!("Addresses to be checked: {}", ips.len()),
        opts.greppable,
        opts.accessible
    );

    let sink = ResultSink::new();
    let scanner = Scanner::new(
        &ips,
        Arc::clone(&run_config),
        &trust,
        sink.clone(),
        opts.greppable,
        opts.accessible,
    )?;

    let interrupted = async {
        if let Err(e) = signal::ctrl_c().await {
            warning!(format!("Could not listen for interrupts: {e}"));
            future::pending::<()>().await;
        }
    };

    tokio::select! {
        accepted = scanner.run() => {
            flush(&sink, &opts)?;
            output!(
                format!("Accepted {accepted} candidates"),
                opts.greppable,
                opts.accessible
            );
        }
        () = interrupted => {
            warning!(
                format!("Interrupted, writing {} candidates found so far", sink.len()),
                opts.greppable,
                opts.accessible
            );
            flush(&sink, &opts)?;
            process::exit(1);
        }
    }

    Ok(())
}

fn flush(sink: &ResultSink, opts: &Opts) -> anyhow::Result<()> {
    let written = sink
        .flush(&opts.output)
        .with_context(|| format!("could not write results to {}", opts.output.display()))?;
    debug!("{written} lines written to {}", opts.output.display());
    Ok(())
}

#[cfg(unix)]
fn check_ulimit(opts: &Opts) {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    let soft = Resource::NOFILE
        .get()
        .map_or(DEFAULT_FILE_DESCRIPTORS_LIMIT, |(soft, _)| soft);

    if u64::from(opts.concurrency) > soft {
        warning!(
            format!(
                "Concurrency {} is higher than your open file limit {soft}. Some probes may fail; raise it with --ulimit.",
                opts.concurrency
            ),
            opts.greppable,
            opts.accessible
        );
    }
}
