//! Session configuration

use serde::{Deserialize, Serialize};
use spdy_proto::{DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_CONCURRENT_STREAMS, MAX_WINDOW_SIZE};
use thiserror::Error;

/// zlib default compression level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not exceed 2^31 - 1")]
    WindowTooLarge(&'static str),

    #[error("{0} must be > 0")]
    ZeroStreamLimit(&'static str),

    #[error("Compression level must be within 0..=9, got {0}")]
    InvalidCompressionLevel(u32),
}

/// Per-session settings
///
/// Window sizes and stream limits seed streams created after they are set;
/// existing streams keep the values they were created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receive window granted to the peer on each new stream
    pub local_initial_window_size: u32,

    /// Send window assumed for each new stream until the peer says otherwise
    pub peer_initial_window_size: u32,

    /// Maximum concurrent streams this side admits
    pub local_max_concurrent_streams: u32,

    /// Maximum concurrent streams the peer admits
    pub peer_max_concurrent_streams: u32,

    /// zlib level for outbound header blocks
    pub deflater_compression_level: u32,
}

impl SessionConfig {
    pub fn server_default() -> Self {
        Self::default()
    }

    pub fn client_default() -> Self {
        Self::default()
    }

    pub fn with_local_initial_window_size(mut self, size: u32) -> Self {
        self.local_initial_window_size = size;
        self
    }

    pub fn with_peer_initial_window_size(mut self, size: u32) -> Self {
        self.peer_initial_window_size = size;
        self
    }

    pub fn with_local_max_concurrent_streams(mut self, max: u32) -> Self {
        self.local_max_concurrent_streams = max;
        self
    }

    pub fn with_peer_max_concurrent_streams(mut self, max: u32) -> Self {
        self.peer_max_concurrent_streams = max;
        self
    }

    pub fn with_deflater_compression_level(mut self, level: u32) -> Self {
        self.deflater_compression_level = level;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_initial_window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge("local_initial_window_size"));
        }
        if self.peer_initial_window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge("peer_initial_window_size"));
        }
        if self.local_max_concurrent_streams == 0 {
            return Err(ConfigError::ZeroStreamLimit("local_max_concurrent_streams"));
        }
        if self.peer_max_concurrent_streams == 0 {
            return Err(ConfigError::ZeroStreamLimit("peer_max_concurrent_streams"));
        }
        validate_compression_level(self.deflater_compression_level)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            peer_initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            local_max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            peer_max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            deflater_compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

pub(crate) fn validate_compression_level(level: u32) -> Result<(), ConfigError> {
    if level > 9 {
        return Err(ConfigError::InvalidCompressionLevel(level));
    }
    Ok(())
}
