//! Configuration management for the companion audio core

pub mod file;

use serde::Serialize;

use crate::voice::{DEFAULT_BLOCK_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Resolved configuration
#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    /// Audio pipeline configuration
    pub audio: AudioConfig,
}

/// Audio pipeline configuration
#[derive(Debug, Clone, Serialize)]
pub struct AudioConfig {
    /// Input context rate; outgoing frames are tagged with it
    pub input_sample_rate: u32,

    /// Output context rate; incoming chunks are interpreted at it
    pub output_sample_rate: u32,

    /// Samples per capture block
    pub block_size: usize,

    /// Input device name (`COMPANION_INPUT_DEVICE`)
    pub input_device: Option<String>,

    /// Output device name (`COMPANION_OUTPUT_DEVICE`)
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            input_device: None,
            output_device: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the resolved values are unusable
    pub fn load() -> Result<Self> {
        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration with priority env > toml > default
    ///
    /// Unparseable env values are ignored.
    pub fn from_sources(
        fc: file::CompanionConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let defaults = AudioConfig::default();

        let audio = AudioConfig {
            input_sample_rate: fc
                .audio
                .input_sample_rate
                .unwrap_or(defaults.input_sample_rate),
            output_sample_rate: fc
                .audio
                .output_sample_rate
                .unwrap_or(defaults.output_sample_rate),
            block_size: env("COMPANION_BLOCK_SIZE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.block_size)
                .unwrap_or(defaults.block_size),
            input_device: env("COMPANION_INPUT_DEVICE").or(fc.audio.input_device),
            output_device: env("COMPANION_OUTPUT_DEVICE").or(fc.audio.output_device),
        };

        Self { audio }
    }

    /// Check that the pipeline can run with these values
    ///
    /// # Errors
    ///
    /// Returns error on a zero sample rate or block size
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.audio.block_size == 0 {
            return Err(Error::Config("block size must be non-zero".to_string()));
        }
        if self.audio.input_sample_rate != INPUT_SAMPLE_RATE
            || self.audio.output_sample_rate != OUTPUT_SAMPLE_RATE
        {
            tracing::warn!(
                input = self.audio.input_sample_rate,
                output = self.audio.output_sample_rate,
                "sample rates differ from what the speech model expects"
            );
        }
        Ok(())
    }
}
