//! TOML configuration file loading
//!
//! Supports `~/.config/companion/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CompanionConfigFile {
    /// Audio pipeline configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// `[audio]` table
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Microphone context rate (the speech model expects 16000)
    pub input_sample_rate: Option<u32>,

    /// Playback context rate (the speech model sends 24000)
    pub output_sample_rate: Option<u32>,

    /// Samples per capture block
    pub block_size: Option<usize>,

    /// Input device name; default device when unset
    pub input_device: Option<String>,

    /// Output device name; default device when unset
    pub output_device: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CompanionConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CompanionConfigFile {
    config_file_path().map_or_else(CompanionConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> CompanionConfigFile {
    if !path.exists() {
        return CompanionConfigFile::default();
    }

    match read_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            CompanionConfigFile::default()
        }
    }
}

/// Read and parse the config file at `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config(path: &Path) -> Result<CompanionConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/companion/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("companion").join("config.toml"))
}
