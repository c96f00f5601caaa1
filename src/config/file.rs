//! TOML configuration file loading
//!
//! Supports `~/.config/voice-relay/config.toml` (or `$VOICE_RELAY_CONFIG`) as
//! a persistent config source. All fields are optional; the file is a partial
//! overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "VOICE_RELAY_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Telegram transport
    #[serde(default)]
    pub telegram: TelegramFileConfig,

    /// Gemini text generation
    #[serde(default)]
    pub gemini: GeminiFileConfig,

    /// Speech recognition
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Audio processing
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Telegram settings
#[derive(Debug, Default, Deserialize)]
pub struct TelegramFileConfig {
    /// Pause between getUpdates calls, in milliseconds
    pub poll_interval_ms: Option<u64>,
}

/// Gemini settings
#[derive(Debug, Default, Deserialize)]
pub struct GeminiFileConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub system_instruction: Option<String>,
    pub base_url: Option<String>,
}

/// Speech recognition settings
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "google", "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Recognition language (e.g. "en-US")
    pub language: Option<String>,
    /// Skip the remote call for recordings without voice activity
    pub silence_gate: Option<bool>,
}

/// Speech synthesis settings
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "google", "openai" or "elevenlabs"
    pub provider: Option<String>,
    pub language: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
}

/// Audio processing settings
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Canonical sample rate for recognition
    pub sample_rate: Option<u32>,
    /// Directory for temporary artifacts
    pub temp_dir: Option<String>,
    /// Allow the ffmpeg fallback decoder
    pub ffmpeg: Option<bool>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub telegram: Option<String>,
    pub gemini: Option<String>,
    pub google_speech: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Parse a config file from TOML text
///
/// # Errors
///
/// Returns error if the text is not valid for the schema
pub fn parse_config_file(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from `path`, or the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> ConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return ConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `$VOICE_RELAY_CONFIG` or
/// `~/.config/voice-relay/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-relay").join("config.toml"))
}
