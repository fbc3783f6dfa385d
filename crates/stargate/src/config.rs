//! Connection and negotiation settings.
//!
//! Settings come from a flat TOML document; every key is optional and falls
//! back to the defaults below.
//!
//! ```toml
//! allowed_origins = ["http://localhost"]
//! read_timeout_secs = 30
//! max_frame_size = 16777216
//! max_message_size = 16777216
//! max_request_head = 8192
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

/// Default cap on a reassembled message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StargateConfig {
    /// Origins accepted during negotiation. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Socket read timeout applied to every upgraded connection.
    pub read_timeout_secs: Option<u64>,
    /// Largest frame payload the decoder accepts.
    pub max_frame_size: u64,
    /// Largest message the fragment reassembler accepts.
    pub max_message_size: usize,
    /// Largest HTTP request head accepted by the upgrade handler.
    pub max_request_head: usize,
}

impl Default for StargateConfig {
    fn default() -> Self {
        StargateConfig {
            allowed_origins: Vec::new(),
            read_timeout_secs: Some(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_request_head: 8 * 1024,
        }
    }
}

impl StargateConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
