//! Uplink configuration persisted as TOML.
//!
//! Missing or corrupted config files return sensible defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shutterlink_net::DispatchConfig;

/// Sender-side configuration knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Identity of this device in every envelope.
    pub source_id: String,
    /// Nominal fragment size in encoded bytes. Chosen to stay under the
    /// transport's maximum message size with headroom for envelope fields.
    pub fragment_size: u32,
    /// Ceiling on the encoded payload size; larger blobs are rejected
    /// before any send is attempted.
    pub max_transfer_size: u64,
    /// Deadline for one publish attempt, milliseconds.
    pub ack_deadline_ms: u64,
    /// Retry budget per message, per transport.
    pub max_retries: u32,
    /// Topic for primary publishes.
    pub topic: String,
    /// Endpoint for fallback requests.
    pub fallback_endpoint: String,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            source_id: "camera-0".to_string(),
            fragment_size: 4096,
            max_transfer_size: 8 * 1024 * 1024,
            ack_deadline_ms: 5000,
            max_retries: 3,
            topic: "shutterlink/transfers".to_string(),
            fallback_endpoint: "/api/v1/fragments".to_string(),
        }
    }
}

impl UplinkConfig {
    /// Load from a TOML file, returning defaults if the file is missing or
    /// corrupted.
    pub fn load_from_path(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "uplink config loaded");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "corrupted uplink config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "uplink config not found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read uplink config, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Save to a TOML file.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory: {}", parent.display())
            })?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize uplink config")?;
        std::fs::write(path, &contents)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::info!(path = %path.display(), "uplink config saved");
        Ok(())
    }

    /// Publish ack deadline as a [`Duration`].
    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms)
    }

    /// Derive the dispatcher configuration.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            topic: self.topic.clone(),
            endpoint: self.fallback_endpoint.clone(),
            ack_deadline: self.ack_deadline(),
            max_retries: self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("uplink.toml");

        let config = UplinkConfig {
            source_id: "camera-42".to_string(),
            fragment_size: 1500,
            max_transfer_size: 1024 * 1024,
            ack_deadline_ms: 750,
            max_retries: 5,
            topic: "site-7/photos".to_string(),
            fallback_endpoint: "/upload".to_string(),
        };
        config.save_to_path(&path).unwrap();

        let loaded = UplinkConfig::load_from_path(&path);
        assert_eq!(config, loaded);
    }

    #[test]
    fn missing_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let loaded = UplinkConfig::load_from_path(&tmp.path().join("nope.toml"));
        assert_eq!(loaded, UplinkConfig::default());
    }

    #[test]
    fn corrupted_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("uplink.toml");
        std::fs::write(&path, "{{{{not valid toml}}}}").unwrap();

        let loaded = UplinkConfig::load_from_path(&path);
        assert_eq!(loaded, UplinkConfig::default());
    }

    #[test]
    fn dispatch_config_mirrors_knobs() {
        let config = UplinkConfig {
            ack_deadline_ms: 1234,
            max_retries: 7,
            ..UplinkConfig::default()
        };
        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.ack_deadline, Duration::from_millis(1234));
        assert_eq!(dispatch.max_retries, 7);
        assert_eq!(dispatch.topic, config.topic);
        assert_eq!(dispatch.endpoint, config.fallback_endpoint);
    }
}
