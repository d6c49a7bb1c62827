//! Server configuration, read from `INNKEEP_*` environment variables.
//! Values that are missing or don't parse fall back to their defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to listen on
    pub bind: String,
    /// HTTP API port
    pub port: u16,
    /// Directory holding the WAL
    pub data_dir: PathBuf,
    /// WAL appends before the compactor rewrites the log
    pub compact_threshold: u64,
    /// How often the compactor checks the threshold
    pub compact_interval: Duration,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
    /// JSON file of rooms to create at startup
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            metrics_port: None,
            seed_file: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("INNKEEP_BIND")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.bind),
            port: parsed(&lookup, "INNKEEP_PORT").unwrap_or(defaults.port),
            data_dir: lookup("INNKEEP_DATA_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed(&lookup, "INNKEEP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed(&lookup, "INNKEEP_COMPACT_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            metrics_port: parsed(&lookup, "INNKEEP_METRICS_PORT"),
            seed_file: lookup("INNKEEP_SEED_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}
