//! TOML configuration file loading
//!
//! Supports `~/.config/elio/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElioConfigFile {
    /// Remote endpoint and credential
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Session open parameters
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Audio pipeline tuning
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Remote endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// API key (prefer the `GEMINI_API_KEY` environment variable)
    pub key: Option<String>,

    /// WebSocket endpoint URL
    pub endpoint: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Model identifier
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Fenrir")
    pub voice: Option<String>,

    /// Path to a file holding the system instruction
    pub instruction_file: Option<PathBuf>,

    /// Seconds to wait for the open acknowledgement (0 disables)
    pub connect_timeout_secs: Option<u64>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per capture frame
    pub frame_size: Option<usize>,

    /// Rate of transmitted audio
    pub input_sample_rate: Option<u32>,

    /// Rate of received speech
    pub output_sample_rate: Option<u32>,

    /// Analyser window, power of two
    pub fft_size: Option<usize>,

    /// Amplitude refresh period
    pub amplitude_interval_ms: Option<u64>,

    /// Start with the microphone muted
    pub start_muted: Option<bool>,
}

/// Parse a config file at `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn parse_config_file(path: &Path) -> Result<ElioConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `ElioConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ElioConfigFile {
    let Some(path) = config_file_path() else {
        return ElioConfigFile::default();
    };

    if !path.exists() {
        return ElioConfigFile::default();
    }

    match parse_config_file(&path) {
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
            ElioConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/elio/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("elio").join("config.toml"))
}
