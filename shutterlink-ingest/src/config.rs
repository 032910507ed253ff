//! Receiver configuration, persisted as TOML.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Tunables for the reassembly engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// A collecting transfer with no new messages for this long is expired.
    pub idle_timeout_ms: u64,
    /// Hard ceiling on a transfer's total collecting time, regardless of
    /// activity.
    pub max_transfer_duration_ms: u64,
    /// How long a terminal entry lingers to absorb late duplicates before
    /// the sweeper drops it.
    pub grace_window_ms: u64,
    /// How often the background sweeper runs.
    pub sweep_interval_ms: u64,
    /// Transfers declaring a larger encoded payload are rejected outright.
    pub max_transfer_size: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30_000,
            max_transfer_duration_ms: 300_000,
            grace_window_ms: 60_000,
            sweep_interval_ms: 5_000,
            max_transfer_size: 8 * 1024 * 1024,
        }
    }
}

impl IngestConfig {
    /// Load config from `path`. A missing or unreadable file falls back to
    /// defaults so a stale config never keeps the receiver from starting.
    pub fn load_from_path(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(error) => {
                    tracing::warn!(?path, %error, "invalid ingest config, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist config as TOML at `path`.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("serialize ingest config")?;
        std::fs::write(path, raw).with_context(|| format!("write ingest config to {path:?}"))?;
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_transfer_duration(&self) -> Duration {
        Duration::from_millis(self.max_transfer_duration_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig::load_from_path(&dir.path().join("nope.toml"));
        assert_eq!(config, IngestConfig::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "idle_timeout_ms = \"not a number\"").unwrap();
        assert_eq!(IngestConfig::load_from_path(&path), IngestConfig::default());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.toml");
        let config = IngestConfig {
            idle_timeout_ms: 10_000,
            grace_window_ms: 5_000,
            ..IngestConfig::default()
        };
        config.save_to_path(&path).unwrap();
        assert_eq!(IngestConfig::load_from_path(&path), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "idle_timeout_ms = 1000").unwrap();
        let config = IngestConfig::load_from_path(&path);
        assert_eq!(config.idle_timeout_ms, 1000);
        assert_eq!(
            config.max_transfer_size,
            IngestConfig::default().max_transfer_size
        );
    }
}
