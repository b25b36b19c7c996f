//! Client Configuration
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Values load from an optional TOML file and are then
//! overridden by `TXLINK_*` environment variables, e.g.
//! `TXLINK_CONNECT_TIMEOUT_MS=2000`.

use anyhow::{ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use txlink_codec::{FieldId, STAN_FIELD};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TXLINK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// Deadline applied to every `send()`; `None` waits until reply or close
    pub request_timeout_ms: Option<u64>,
    /// Largest payload accepted in either direction
    pub max_frame_size: usize,
    /// Requests that may wait for the writer loop at once
    pub write_queue_depth: usize,
    /// Capacity of the unmatched-message queue; 0 disables queueing (messages are still logged)
    pub unmatched_queue_depth: usize,
    /// Field auto-populated with a STAN when a request leaves it empty
    pub stan_field: FieldId,
    /// Close the connection when a write fails instead of failing only that request
    pub close_on_write_failure: bool,
    /// Buffer size for the read half
    pub read_buffer_size: usize,
    /// Set TCP_NODELAY on connected sockets
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: None,
            max_frame_size: 64 * 1024, // 64KB
            write_queue_depth: 1,
            unmatched_queue_depth: 64,
            stan_field: STAN_FIELD,
            close_on_write_failure: true,
            read_buffer_size: 8 * 1024,
            nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Load from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading client config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("Failed to build client configuration")?
            .try_deserialize()
            .context("Failed to deserialize client configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.write_queue_depth > 0, "write_queue_depth must be at least 1");
        ensure!(self.max_frame_size > 0, "max_frame_size must be positive");
        ensure!(self.read_buffer_size > 0, "read_buffer_size must be positive");
        ensure!(
            self.request_timeout_ms != Some(0),
            "request_timeout_ms must be positive when set"
        );
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stan_field, 11);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "request_timeout_ms = 1500\nmax_frame_size = 4096\nclose_on_write_failure = false"
        )
        .unwrap();

        let config = ClientConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.max_frame_size, 4096);
        assert!(!config.close_on_write_failure);
        // untouched fields keep their defaults
        assert_eq!(config.write_queue_depth, 1);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "write_queue_depth = 0").unwrap();
        assert!(ClientConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(ClientConfig::load(Some(Path::new("/nonexistent/txlink.toml"))).is_err());
    }
}
