//! Configuration management for Elio live sessions

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::live::{DEFAULT_ENDPOINT, Modality, SessionSetup};
use crate::persona::{self, Persona};
use crate::voice::{
    CaptureConfig, DEFAULT_FFT_SIZE, FRAME_SIZE, INPUT_SAMPLE_RATE, MAX_FFT_SIZE,
    OUTPUT_SAMPLE_RATE, OutputConfig,
};
use crate::{Error, Result};

pub use file::{ElioConfigFile, config_file_path, load_config_file, parse_config_file};

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default amplitude refresh period (about one display frame at 60 Hz)
pub const DEFAULT_AMPLITUDE_INTERVAL: Duration = Duration::from_millis(16);

/// Live session configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API credential, never logged
    pub api_key: Option<SecretString>,

    /// WebSocket endpoint URL (without credentials)
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Persona the model speaks as
    pub persona: Persona,

    /// Time allowed between connect and the open acknowledgement
    ///
    /// `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// Audio pipeline configuration
    pub audio: AudioConfig,
}

/// Audio pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Samples per capture frame
    pub frame_size: usize,

    /// Rate frames are transmitted at
    pub input_sample_rate: u32,

    /// Rate inbound speech is decoded at
    pub output_sample_rate: u32,

    /// Analyser window
    pub fft_size: usize,

    /// Amplitude refresh period
    pub amplitude_interval: Duration,

    /// Whether the mute gate starts closed
    pub start_muted: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_size: FRAME_SIZE,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            fft_size: DEFAULT_FFT_SIZE,
            amplitude_interval: DEFAULT_AMPLITUDE_INTERVAL,
            start_muted: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            persona: Persona::default(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if an instruction file cannot be read or a value is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration with precedence env > file > defaults
    ///
    /// # Errors
    ///
    /// Returns error if an instruction file cannot be read or a value is invalid
    pub fn from_sources(
        fc: ElioConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.api.key)
            .map(SecretString::from);

        let endpoint = env("ELIO_ENDPOINT")
            .or(fc.api.endpoint)
            .unwrap_or(defaults.endpoint);

        let model = env("ELIO_MODEL")
            .or(fc.session.model)
            .unwrap_or(defaults.model);

        let mut persona = defaults.persona;
        if let Some(voice) = env("ELIO_VOICE").or(fc.session.voice) {
            persona.voice = voice;
        }
        let instruction_file = env("ELIO_INSTRUCTION_FILE")
            .map(PathBuf::from)
            .or(fc.session.instruction_file);
        if let Some(path) = instruction_file {
            persona = persona.with_instruction_file(&path)?;
        }

        let timeout_secs = match env("ELIO_CONNECT_TIMEOUT_SECS") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("ELIO_CONNECT_TIMEOUT_SECS must be seconds, got {raw:?}"))
            })?),
            None => fc.session.connect_timeout_secs,
        };
        let connect_timeout = match timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.connect_timeout,
        };

        let audio_defaults = defaults.audio;
        let audio = AudioConfig {
            frame_size: fc.audio.frame_size.unwrap_or(audio_defaults.frame_size),
            input_sample_rate: fc
                .audio
                .input_sample_rate
                .unwrap_or(audio_defaults.input_sample_rate),
            output_sample_rate: fc
                .audio
                .output_sample_rate
                .unwrap_or(audio_defaults.output_sample_rate),
            fft_size: fc.audio.fft_size.unwrap_or(audio_defaults.fft_size),
            amplitude_interval: fc
                .audio
                .amplitude_interval_ms
                .map_or(audio_defaults.amplitude_interval, Duration::from_millis),
            start_muted: fc.audio.start_muted.unwrap_or(audio_defaults.start_muted),
        };

        let config = Self {
            api_key,
            endpoint,
            model,
            persona,
            connect_timeout,
            audio,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.frame_size == 0 {
            return Err(Error::Config("audio.frame_size must be non-zero".to_string()));
        }
        if audio.input_sample_rate == 0 || audio.output_sample_rate == 0 {
            return Err(Error::Config("audio sample rates must be non-zero".to_string()));
        }
        if !audio.fft_size.is_power_of_two() || !(32..=MAX_FFT_SIZE).contains(&audio.fft_size) {
            return Err(Error::Config(format!(
                "audio.fft_size must be a power of two in 32..={MAX_FFT_SIZE}, got {}",
                audio.fft_size
            )));
        }
        if audio.amplitude_interval.is_zero() {
            return Err(Error::Config(
                "audio.amplitude_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }
        Ok(())
    }

    /// Replace the system instruction with the contents of `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is empty
    pub fn set_instruction_file(&mut self, path: &std::path::Path) -> Result<()> {
        self.persona.instruction = persona::load_instruction(path)?;
        Ok(())
    }

    /// Session open request for this configuration
    #[must_use]
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            modality: Modality::Audio,
            voice: self.persona.voice.clone(),
            system_instruction: self.persona.instruction.clone(),
        }
    }

    /// Microphone parameters
    #[must_use]
    pub const fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.audio.input_sample_rate,
            frame_size: self.audio.frame_size,
        }
    }

    /// Output device parameters
    #[must_use]
    pub const fn output_config(&self) -> OutputConfig {
        OutputConfig {
            sample_rate: self.audio.output_sample_rate,
            fft_size: self.audio.fft_size,
        }
    }
}
