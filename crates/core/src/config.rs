//! Runtime configuration.
//!
//! Parsed from YAML; every field has a default so an empty or missing file
//! is a valid configuration.

use crate::error::{PhoenixError, PhoenixResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listing page size.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Default wait for another process to release the data directory.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoenixConfig {
    /// Root for table snapshots and artifacts.
    pub data_dir: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub page_size: usize,
    /// How long opening waits for the data directory lock.
    pub lock_timeout_secs: u64,
}

impl Default for PhoenixConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("phoenix-data"),
            log_filter: "info".into(),
            page_size: DEFAULT_PAGE_SIZE,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl PhoenixConfig {
    pub fn from_yaml_str(raw: &str) -> PhoenixResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| PhoenixError::InvalidInput(format!("Invalid config: {e}")))?;
        if config.page_size == 0 {
            return Err(PhoenixError::InvalidInput(
                "page_size must be positive".into(),
            ));
        }
        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    /// Directory holding one JSON snapshot per table.
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// Root of the artifact tree.
    pub fn resource_dir(&self) -> PathBuf {
        self.data_dir.join("resource")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
