//! Engine configuration
//!
//! Bootstrap settings loaded from an optional TOML file. Every field has a
//! built-in default, so an empty file (or no file at all) is a valid config.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tunables for samples, streams and the offline renderer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output rate used when no mixer supplies one (CLI offline mixer)
    pub output_rate: u32,

    /// Stream ring buffer capacity in int16 samples
    pub stream_buffer_samples: usize,

    /// Largest output block a single stream `read` can fill, in samples
    pub stream_max_block_samples: usize,

    /// Chunk size used when pulling a whole source into a sample, in samples
    pub loader_read_chunk: usize,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_rate: 44100,
            stream_buffer_samples: 16384, // ~186ms stereo @ 44.1kHz
            stream_max_block_samples: 8192,
            loader_read_chunk: 65536,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        debug!("Loaded engine config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.output_rate == 0 {
            return Err(Error::Config("output_rate must be non-zero".to_string()));
        }
        if self.stream_buffer_samples < 2 {
            return Err(Error::Config(
                "stream_buffer_samples must hold at least one stereo frame".to_string(),
            ));
        }
        if self.stream_max_block_samples < 2 || self.loader_read_chunk < 2 {
            return Err(Error::Config("block sizes must be at least 2 samples".to_string()));
        }
        Ok(())
    }
}
