//! Top-level configuration: composition of the per-crate configs.
//!
//! Loaded from a single YAML file. Every section has serde defaults so
//! a minimal config (one forwarder) is enough to run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use trap2json_core::config::LoggerConfig;
use trap2json_core::error::ConfigError;
use trap2json_correlate::CorrelateConfig;
use trap2json_snmp::TrapdConfig;

/// Prometheus endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Enable the metrics HTTP listener.
    pub enable: bool,
    /// Scrape path. The listener answers on every path; this is kept
    /// for scrape-config symmetry.
    pub path: String,
    /// Listen port.
    pub port: u16,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enable: false,
            path: "/metrics".to_owned(),
            port: 9285,
        }
    }
}

/// Full trap2json configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logger: LoggerConfig,
    pub snmptrapd: TrapdConfig,
    /// Parallel parser workers. 0 means the number of CPUs.
    pub parse_workers: usize,
    pub prometheus: PrometheusConfig,
    pub correlate: CorrelateConfig,
    pub forwarders: Vec<trap2json_forwarder::Config>,
}

impl AppConfig {
    /// Load and parse the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
                reason: e.to_string(),
            })?;
        config.apply_defaults();
        Ok(config)
    }

    /// Fill in runtime defaults that serde cannot express.
    pub fn apply_defaults(&mut self) {
        if self.parse_workers == 0 {
            self.parse_workers = std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1);
        }
    }
}
