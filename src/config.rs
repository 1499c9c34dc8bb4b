//! Command-line configuration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::ExpiryConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// In-memory key-value server with key expiry and JSON snapshots.
#[derive(Debug, Clone, Parser)]
#[command(name = "pebblekv", version, about)]
pub struct Config {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Snapshot file written by SAVE and read at startup
    #[arg(long, default_value = "dump.json")]
    pub db_file: PathBuf,

    /// Milliseconds between expiry sweeps
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["pebblekv"]);
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.db_file, PathBuf::from("dump.json"));
        assert_eq!(config.expiry().interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse_from([
            "pebblekv",
            "--host",
            "0.0.0.0",
            "-p",
            "6380",
            "--db-file",
            "/tmp/snap.json",
            "--sweep-interval-ms",
            "250",
        ]);
        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(config.db_file, PathBuf::from("/tmp/snap.json"));
        assert_eq!(config.expiry().interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Config::try_parse_from(["pebblekv", "--sweep-interval-ms", "0"]).is_err());
    }
}
