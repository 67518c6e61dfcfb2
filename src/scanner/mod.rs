//! Core functionality for actual probing behaviour.
use crate::classifier::{self, GOOGLE_ORG};
use crate::input::{ProbeMode, RunConfig};
use crate::results::{CandidateResult, ResultSink};
use log::{debug, info};

mod pool;
pub mod tls;
pub use pool::WorkerPool;
use tls::{leaf_identity, CertIdentity, TrustStore};

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use colored::Colorize;
use reqwest::{header::SERVER, tls::TlsInfo};
use rustls::pki_types::ServerName;
use tokio::{io, net::TcpStream, time};
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Every probe talks to this port unless the run overrides it.
pub const HTTPS_PORT: u16 = 443;

/// Upper bound for the TCP connect, and separately for the TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(7000);

enum Transport {
    Tls(TlsConnector),
    Http(reqwest::Client),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tls(_) => f.write_str("Tls"),
            Transport::Http(_) => f.write_str("Http"),
        }
    }
}

#[derive(Debug)]
struct ScannerConnector {
    transport: Transport,
    config: Arc<RunConfig>,
    greppable: bool,
    accessible: bool,
}

impl ScannerConnector {
    /// Probes one address and returns the candidate if its identity is
    /// recognized and its server tag is allowed.
    ///
    /// Every failure is logged and swallowed here; a dead address never
    /// affects the rest of the run.
    async fn probe(&self, ip: IpAddr) -> Option<CandidateResult> {
        let candidate = match &self.transport {
            Transport::Tls(connector) => self.probe_tls(connector, ip).await,
            Transport::Http(client) => self.probe_http(client, ip).await,
        }?;

        info!(
            "{}  {}  {}  {}",
            candidate.address, candidate.common_name, candidate.server_name, candidate.latency_millis
        );

        if !self.config.is_allowed(&candidate.server_name) {
            debug!(
                "Dropping {}, server {:?} is not allowed",
                candidate.address, candidate.server_name
            );
            return None;
        }

        self.fmt_candidate(&candidate);
        Some(candidate)
    }

    /// Dials the address, times a bare TLS handshake and classifies the
    /// leaf certificate.
    async fn probe_tls(&self, connector: &TlsConnector, ip: IpAddr) -> Option<CandidateResult> {
        let socket = SocketAddr::new(ip, self.config.port);
        let stream = match self.connect(socket).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Connect to {socket} failed: {e}");
                return None;
            }
        };

        let start = Instant::now();
        let tls_stream = match self.handshake(connector, ip, stream).await {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                debug!("Handshake with {socket} failed: {e}");
                return None;
            }
        };
        let latency_millis = elapsed_millis(start);

        let Some(leaf) = tls_stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
        else {
            debug!("{socket} presented no certificate");
            return None;
        };
        let identity = leaf_identity(leaf.as_ref())?;

        handshake_candidate(ip, identity, latency_millis)
    }

    /// Sends a HEAD request and reads the identity off the response.
    async fn probe_http(&self, client: &reqwest::Client, ip: IpAddr) -> Option<CandidateResult> {
        let url = format!("https://{}", SocketAddr::new(ip, self.config.port));

        let start = Instant::now();
        match client.head(&url).send().await {
            Ok(response) => {
                let latency_millis = elapsed_millis(start);
                let identity = response
                    .extensions()
                    .get::<TlsInfo>()
                    .and_then(TlsInfo::peer_certificate)
                    .and_then(leaf_identity)
                    .unwrap_or_default();
                let server_name = response
                    .headers()
                    .get(SERVER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default();

                Some(response_candidate(ip, identity, server_name, latency_millis))
            }
            Err(e) => {
                let latency_millis = elapsed_millis(start);
                let error_text = format!("{:#}", anyhow::Error::new(e));
                if classifier::is_reset_signature(&error_text) {
                    debug!("HEAD {url} hit the reset signature, treating as gws");
                    reset_candidate(ip, latency_millis)
                } else {
                    debug!("HEAD {url} failed: {error_text}");
                    None
                }
            }
        }
    }

    /// Performs the connection to the socket with timeout
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(
            CONNECT_TIMEOUT,
            async move { TcpStream::connect(socket).await },
        ).await?
    }

    /// Runs the TLS handshake over an open connection with timeout
    async fn handshake(
        &self,
        connector: &TlsConnector,
        ip: IpAddr,
        stream: TcpStream,
    ) -> io::Result<TlsStream<TcpStream>> {
        time::timeout(
            CONNECT_TIMEOUT,
            connector.connect(ServerName::from(ip), stream),
        ).await?
    }

    /// Formats and prints an accepted candidate
    fn fmt_candidate(&self, candidate: &CandidateResult) {
        if !self.greppable {
            let line = format!(
                "{} {}ms {} {}",
                candidate.address, candidate.latency_millis, candidate.common_name, candidate.server_name
            );
            if self.accessible {
                println!("Found {line}");
            } else {
                println!("Found {}", line.purple());
            }
        }
    }
}

/// Builds the candidate for a completed handshake, or `None` when the
/// certificate identity is not recognized.
pub fn handshake_candidate(
    address: IpAddr,
    identity: CertIdentity,
    latency_millis: u64,
) -> Option<CandidateResult> {
    let server_name = classifier::classify(&identity.org_name, &identity.common_name)?;
    Some(CandidateResult {
        address,
        common_name: identity.common_name,
        org_name: identity.org_name,
        server_name: server_name.to_owned(),
        latency_millis,
    })
}

/// Builds the candidate for a full HTTP response. The `Server` header is
/// taken as the server tag as-is.
pub fn response_candidate(
    address: IpAddr,
    identity: CertIdentity,
    server_name: &str,
    latency_millis: u64,
) -> CandidateResult {
    CandidateResult {
        address,
        common_name: identity.common_name,
        org_name: identity.org_name,
        server_name: server_name.to_owned(),
        latency_millis,
    }
}

/// Builds the candidate for a request that failed with the reset signature,
/// as if the peer had presented the google.com certificate.
pub fn reset_candidate(address: IpAddr, latency_millis: u64) -> Option<CandidateResult> {
    let identity = CertIdentity {
        common_name: "google.com".to_owned(),
        org_name: GOOGLE_ORG.to_owned(),
    };
    handshake_candidate(address, identity, latency_millis)
}

fn elapsed_millis(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Probes every address under the configured concurrency ceiling and feeds
/// accepted candidates into a [`ResultSink`].
#[derive(Debug)]
pub struct Scanner {
    ips: Box<[IpAddr]>,
    pool: WorkerPool,
    connector: Arc<ScannerConnector>,
    sink: ResultSink,
}

impl Scanner {
    pub fn new(
        ips: &[IpAddr],
        config: Arc<RunConfig>,
        trust: &TrustStore,
        sink: ResultSink,
        greppable: bool,
        accessible: bool,
    ) -> anyhow::Result<Self> {
        let transport = match config.mode {
            ProbeMode::Tls => Transport::Tls(TlsConnector::from(tls::client_config(trust)?)),
            ProbeMode::Http => Transport::Http(
                reqwest::Client::builder()
                    .danger_accept_invalid_certs(true)
                    .tls_info(true)
                    .timeout(config.http_timeout)
                    .pool_max_idle_per_host(0)
                    .build()?,
            ),
        };

        Ok(Self {
            ips: Box::from(ips),
            pool: WorkerPool::new(config.concurrency),
            connector: Arc::new(ScannerConnector {
                transport,
                config,
                greppable,
                accessible,
            }),
            sink,
        })
    }

    /// Probes every address and waits for the last probe to finish.
    /// Returns how many candidates the sink holds afterwards.
    pub async fn run(&self) -> usize {
        debug!(
            "Start probing. \nConcurrency {}\nNumber of addresses {}\nMode {:?}",
            self.pool_capacity(),
            self.ips.len(),
            self.connector.transport
        );

        self.pool
            .run(self.ips.iter().copied(), |ip| {
                let connector = Arc::clone(&self.connector);
                let sink = self.sink.clone();
                async move {
                    if let Some(candidate) = connector.probe(ip).await {
                        sink.accept(candidate);
                    }
                }
            })
            .await;

        let accepted = self.sink.len();
        debug!("Probing done, {accepted} candidates accepted");
        accepted
    }

    fn pool_capacity(&self) -> u32 {
        self.connector.config.concurrency.get()
    }
}
