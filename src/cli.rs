use anyhow::{bail, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::defaults;

/// TCP echo benchmark - measures round-trip latency and throughput
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of simultaneous connections
    #[clap(short = 'c', long, default_value_t = defaults::CONNECTIONS)]
    pub connections: usize,

    /// Number of messages per connection
    #[clap(short = 'n', long, default_value_t = defaults::MESSAGES)]
    pub messages: usize,

    /// Message size in bytes
    #[clap(short = 's', long, default_value_t = defaults::MESSAGE_SIZE)]
    pub message_size: usize,

    /// Address the server binds and the clients connect to
    #[clap(long, default_value = defaults::HOST)]
    pub host: String,

    /// TCP port (0 picks an ephemeral port)
    #[clap(short = 'p', long, default_value_t = defaults::PORT)]
    pub port: u16,

    /// Output file for the final report (JSON format)
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,
}

/// Validated benchmark parameters.
///
/// Degenerate parameter combinations are rejected here, before any
/// socket is opened or thread is started, so the aggregation step can
/// rely on every connection contributing at least one sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub connections: usize,
    pub messages: usize,
    pub message_size: usize,
    pub host: String,
    pub port: u16,
}

impl BenchmarkConfig {
    /// Build a validated configuration from CLI arguments.
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Self {
            connections: args.connections,
            messages: args.messages,
            message_size: args.message_size,
            host: args.host.clone(),
            port: args.port,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the benchmark cannot run meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            bail!("connection count cannot be zero");
        }
        if self.messages == 0 {
            bail!("message count cannot be zero: latency over an empty sample set is undefined");
        }
        if self.message_size == 0 {
            bail!("message size cannot be zero");
        }
        if self.message_size > 16 * 1024 * 1024 {
            bail!(
                "message size {} is too large (maximum 16MB)",
                self.message_size
            );
        }
        Ok(())
    }

    /// Total payload bytes a clean run echoes end to end.
    pub fn total_bytes(&self) -> u64 {
        self.connections as u64 * self.messages as u64 * self.message_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(connections: usize, messages: usize, message_size: usize) -> BenchmarkConfig {
        BenchmarkConfig {
            connections,
            messages,
            message_size,
            host: defaults::HOST.to_string(),
            port: 0,
        }
    }

    #[test]
    fn test_validate_rejects_degenerate_configs() {
        assert!(config(0, 1, 1).validate().is_err());
        assert!(config(1, 0, 1).validate().is_err());
        assert!(config(1, 1, 0).validate().is_err());
        assert!(config(1, 1, 16 * 1024 * 1024 + 1).validate().is_err());
        assert!(config(1, 1, 1).validate().is_ok());
        assert!(config(20, 4096, 4096).validate().is_ok());
    }

    #[test]
    fn test_total_bytes() {
        assert_eq!(config(2, 5, 100).total_bytes(), 1000);
        assert_eq!(config(20, 4096, 4096).total_bytes(), 20 * 4096 * 4096);
    }

    #[test]
    fn test_defaults_applied_by_clap() {
        let args = Args::parse_from(["echo-bench"]);
        assert_eq!(args.connections, defaults::CONNECTIONS);
        assert_eq!(args.messages, defaults::MESSAGES);
        assert_eq!(args.message_size, defaults::MESSAGE_SIZE);
        assert_eq!(args.host, defaults::HOST);
        assert_eq!(args.port, defaults::PORT);
        assert!(args.output_file.is_none());
    }
}
