//! Configuration Management
//!
//! Environment settings for fleetscan, read from a YAML document:
//!
//! ```yaml
//! regions: [us-east-1, eu-west-1]
//! tagset: [Owner, CostCenter]
//! s3_bucket_naming_policy: "^(dev|stg|prd)-[a-z0-9-]+$"
//! concurrency: 8
//! batch_size: 10
//! call_timeout_secs: 120
//! retry:
//!   max_retries: 3
//! ```

use crate::aws::retry::RetryConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternate config file
pub const CONFIG_ENV_VAR: &str = "FLEETSCAN_CONFIG";

/// Environment configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Regions queried for regional services
    pub regions: Vec<String>,
    /// Tag keys every bucket must carry
    pub tagset: Vec<String>,
    /// Regex bucket names must match
    pub s3_bucket_naming_policy: Option<String>,
    /// Override for every service endpoint
    pub endpoint_url: Option<String>,
    /// Parallel fan-out width
    pub concurrency: usize,
    /// Records per enrichment batch
    pub batch_size: usize,
    /// Upper bound for one cell or one batch
    pub call_timeout_secs: u64,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            tagset: Vec::new(),
            s3_bucket_naming_policy: None,
            endpoint_url: None,
            concurrency: 8,
            batch_size: 10,
            call_timeout_secs: 120,
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Default config file path
    fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".aws").join("fleetscan.yaml"))
    }

    /// Load configuration: explicit path > `FLEETSCAN_CONFIG` > `~/.aws/fleetscan.yaml`.
    ///
    /// An explicitly named file must exist. The default file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Self::from_file(Path::new(&path));
            }
        }

        let Some(path) = Self::default_path() else {
            tracing::debug!("no home directory, using default configuration");
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), regions = config.regions.len(), "loaded config");
        Ok(config)
    }

    /// Parse YAML. An empty document yields the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        if config.concurrency == 0 || config.batch_size == 0 {
            return Err(Error::config("concurrency and batch_size must be positive"));
        }
        Ok(config)
    }

    /// Regions to query: CLI override > config file
    pub fn effective_regions(&self, cli: &[String]) -> Vec<String> {
        if cli.is_empty() {
            self.regions.clone()
        } else {
            cli.to_vec()
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
