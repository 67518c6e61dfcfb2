//! Provides a means to read, parse and hold configuration options for runs.
use crate::scanner::HTTPS_PORT;
use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONCURRENCY: u32 = 100;
const DEFAULT_HTTP_TIMEOUT_MILLIS: u64 = 5000;

/// Represents the probe that is run against every address.
///   - Tls dials port 443 and reads the certificate from a bare handshake.
///   - Http sends an HTTPS HEAD request and trusts the `Server` header.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    Tls,
    Http,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "edgescan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Finds the fastest edge servers presenting a known certificate identity.
/// WARNING Do not point this program at infrastructure you do not own, it
/// opens thousands of TLS connections in a short time.
pub struct Opts {
    /// Newline-delimited file of addresses, dash ranges or CIDRs to probe.
    #[arg(short, long, default_value = "iprange.txt")]
    pub ranges: PathBuf,

    /// Path to the JSON config file.
    #[arg(short, long, default_value = "config.json")]
    pub config_path: PathBuf,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// PEM bundle of trusted root certificates.
    #[arg(long, default_value = "cacert.pem")]
    pub cacert: PathBuf,

    /// File the ranked results are written to. Overwritten on every run.
    #[arg(short, long, default_value = "okip.txt")]
    pub output: PathBuf,

    /// The probe to run against every address.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "tls")]
    pub mode: ProbeMode,

    /// How many probes may run at the same time. Depends on the open file
    /// limit of your OS.
    #[arg(short = 'b', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u32,

    /// A comma-delimited list of server tags to keep. Example: gws,"gvs 1.0"
    #[arg(short, long, value_delimiter = ',')]
    pub server: Vec<String>,

    /// The timeout in milliseconds of a whole HEAD request (http mode only).
    #[arg(short = 't', long, default_value_t = DEFAULT_HTTP_TIMEOUT_MILLIS)]
    pub http_timeout: u64,

    /// Greppable mode. Only errors are printed, results go to the output file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Destination port of every probe. Meant for local test responders.
    #[arg(long, hide = true, default_value_t = HTTPS_PORT)]
    pub port: u16,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merges values found within the user configuration file into the
    /// command line options. The configuration file wins.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(concurrency, server, http_timeout, mode);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(ulimit);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            ranges: PathBuf::from("iprange.txt"),
            config_path: PathBuf::from("config.json"),
            no_config: true,
            cacert: PathBuf::from("cacert.pem"),
            output: PathBuf::from("okip.txt"),
            mode: ProbeMode::Tls,
            concurrency: DEFAULT_CONCURRENCY,
            server: vec![],
            http_timeout: DEFAULT_HTTP_TIMEOUT_MILLIS,
            greppable: true,
            accessible: false,
            ulimit: None,
            port: HTTPS_PORT,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    concurrency: Option<u32>,
    server: Option<Vec<String>>,
    http_timeout: Option<u64>,
    mode: Option<ProbeMode>,
    ulimit: Option<u64>,
}

impl Config {
    /// Reads the configuration file in JSON format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// ```json
    /// {
    ///     "concurrency": 500,
    ///     "server": ["gws", "gvs 1.0"],
    ///     "httpTimeout": 3000
    /// }
    /// ```
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("malformed config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Settings every probe of a run reads. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub concurrency: NonZeroU32,
    pub allowed_server_names: HashSet<String>,
    pub http_timeout: Duration,
    pub mode: ProbeMode,
    pub port: u16,
}

impl RunConfig {
    pub fn from_opts(opts: &Opts) -> anyhow::Result<Self> {
        let Some(concurrency) = NonZeroU32::new(opts.concurrency) else {
            bail!("concurrency must be a positive integer");
        };
        if opts.mode == ProbeMode::Http && opts.http_timeout == 0 {
            bail!("httpTimeout must be a positive number of milliseconds");
        }
        if opts.port == 0 {
            bail!("port must be between 1 and 65535");
        }

        Ok(Self {
            concurrency,
            allowed_server_names: opts.server.iter().cloned().collect(),
            http_timeout: Duration::from_millis(opts.http_timeout),
            mode: opts.mode,
            port: opts.port,
        })
    }

    pub fn is_allowed(&self, server_name: &str) -> bool {
        self.allowed_server_names.contains(server_name)
    }
}
