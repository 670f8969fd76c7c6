//! Proxy configuration.
//!
//! Flags with environment fallbacks, validated into a `Config` once at
//! startup. Nothing here changes after the process starts serving.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use crate::discovery::DiscoveryConfig;
use crate::endpoint::{EndpointAddress, DEFAULT_DIAL_HOST, DEFAULT_LISTEN_HOST};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// sentinel-proxy - forward TCP connections to the current Redis master.
#[derive(Debug, Parser)]
#[command(name = "sentinel-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Local address to listen on.
    #[arg(long, env = "SENTINEL_PROXY_LISTEN", default_value = ":9999")]
    pub listen: String,

    /// Comma-separated sentinel addresses.
    #[arg(long, env = "SENTINEL_PROXY_SENTINELS", default_value = ":26379")]
    pub sentinel: String,

    /// Name of the master monitored by the sentinels.
    #[arg(long, env = "SENTINEL_PROXY_MASTER")]
    pub master: String,

    /// Location of the pid file.
    #[arg(long, env = "SENTINEL_PROXY_PIDFILE")]
    pub pidfile: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "SENTINEL_PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "SENTINEL_PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address clients connect to.
    pub listen: EndpointAddress,

    /// Sentinels to poll.
    pub sentinels: Vec<EndpointAddress>,

    /// Master name to resolve.
    pub master_name: String,

    /// Optional pid file.
    pub pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Parse process arguments and environment.
    pub fn load() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Validate parsed arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        let listen = EndpointAddress::parse_with_default_host(&args.listen, DEFAULT_LISTEN_HOST)
            .with_context(|| format!("Invalid listen address {:?}", args.listen))?;

        let sentinels = args
            .sentinel
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                EndpointAddress::parse_with_default_host(s, DEFAULT_DIAL_HOST)
                    .with_context(|| format!("Invalid sentinel address {s:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        if sentinels.is_empty() {
            bail!("At least one sentinel address is required.");
        }

        let master_name = args.master.trim().to_string();
        if master_name.is_empty() {
            bail!("Master name must not be empty.");
        }

        Ok(Self {
            listen,
            sentinels,
            master_name,
            pid_file: args.pidfile,
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }

    /// Discovery settings with default timings.
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig::new(self.sentinels.clone(), self.master_name.clone())
    }
}
