//! Pipeline configuration
//!
//! Every section has defaults matching the behaviour of the bare pipeline, so a
//! TOML document only needs to name the values it changes.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Custom IO configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Size in bytes of the buffer handed to the AVIO context
    pub buffer_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self { buffer_size: 4096 }
    }
}

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Export encoder priming/padding as frame metadata instead of letting the
    /// codec trim it, so the audio reader can keep timestamps exact
    pub manual_skip: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { manual_skip: true }
    }
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Samples per frame when the codec accepts any frame size (PCM, ...)
    pub default_frame_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            default_frame_size: 1152,
        }
    }
}

/// Muxer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    /// Let FFmpeg interleave packets across streams before writing them
    pub interleaved: bool,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self { interleaved: true }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub io: IoConfig,
    pub decoder: DecoderConfig,
    pub encoder: EncoderConfig,
    pub muxer: MuxerConfig,
}

impl PipelineConfig {
    /// Parse a configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("failed to serialize: {}", e)))
    }

    /// Reject values FFmpeg cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.io.buffer_size == 0 || self.io.buffer_size > i32::MAX as usize {
            return Err(PipelineError::Config(format!(
                "io.buffer_size must be in 1..={}, got {}",
                i32::MAX,
                self.io.buffer_size
            )));
        }
        if self.encoder.default_frame_size == 0 {
            return Err(PipelineError::Config(
                "encoder.default_frame_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
