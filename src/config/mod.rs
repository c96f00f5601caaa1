//! Configuration management for voice-relay
//!
//! Precedence is env > TOML file > defaults. Secrets are wrapped in
//! [`SecretString`] as soon as they are read.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::llm::DEFAULT_SYSTEM_INSTRUCTION;
use crate::voice::{DEFAULT_LANGUAGE, SAMPLE_RATE, SttProvider, TtsProvider};
use crate::{Error, Result};

pub use file::{ConfigFile, load_config_file, parse_config_file};

/// Default Gemini model
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default pause between Telegram polls
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// voice-relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram transport configuration
    pub telegram: TelegramConfig,

    /// Gemini configuration
    pub gemini: GeminiConfig,

    /// Speech recognition configuration
    pub stt: SttConfig,

    /// Speech synthesis configuration
    pub tts: TtsConfig,

    /// Audio processing configuration
    pub audio: AudioConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Telegram transport configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Pause between getUpdates calls
    pub poll_interval: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Gemini text generation configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Reply length cap in tokens
    pub max_output_tokens: u32,

    /// Instruction sent with every request
    pub system_instruction: String,

    /// API base URL override
    pub base_url: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 500,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            base_url: None,
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Recognition backend
    pub provider: SttProvider,

    /// Backend model (ignored by Google)
    pub model: String,

    /// Language hint
    pub language: Option<String>,

    /// Answer `NoSpeechDetected` locally, without calling the backend, when a
    /// recording has no voice activity. Off unless enabled.
    pub silence_gate: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::Google,
            model: default_stt_model(SttProvider::Google).to_string(),
            language: None,
            silence_gate: false,
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis backend
    pub provider: TtsProvider,

    /// Language of synthesized replies
    pub language: String,

    /// Voice identifier (`OpenAI` voice name or `ElevenLabs` voice ID)
    pub voice: String,

    /// Backend model
    pub model: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        let (voice, model) = default_tts_voice_model(TtsProvider::Google);
        Self {
            provider: TtsProvider::Google,
            language: DEFAULT_LANGUAGE.to_string(),
            voice: voice.to_string(),
            model: model.to_string(),
        }
    }
}

/// Audio processing configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Canonical sample rate for recognition
    pub sample_rate: u32,

    /// Directory for temporary artifacts (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    /// Allow falling back to ffmpeg for formats the native decoder lacks
    pub ffmpeg: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            temp_dir: None,
            ffmpeg: true,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Telegram bot token
    pub telegram: Option<SecretString>,

    /// Gemini API key
    pub gemini: Option<SecretString>,

    /// Google Web Speech API key
    pub google_speech: Option<SecretString>,

    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

fn default_stt_model(provider: SttProvider) -> &'static str {
    match provider {
        SttProvider::Google => "",
        SttProvider::Whisper => "whisper-1",
        SttProvider::Deepgram => "nova-2",
    }
}

fn default_tts_voice_model(provider: TtsProvider) -> (&'static str, &'static str) {
    match provider {
        TtsProvider::Google => ("", ""),
        TtsProvider::OpenAI => ("alloy", "tts-1"),
        TtsProvider::ElevenLabs => ("21m00Tcm4TlvDq8ikWAM", "eleven_multilingual_v2"),
    }
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from the process environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or numeric setting is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path);
        Self::from_sources(|key| std::env::var(key).ok(), fc)
    }

    /// Build configuration from an environment lookup and a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or numeric setting is invalid
    pub fn from_sources<F>(env: F, fc: ConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_keys = ApiKeys {
            telegram: secret(var("TELEGRAM_BOT_TOKEN").or(fc.api_keys.telegram)),
            gemini: secret(var("GEMINI_API_KEY").or(fc.api_keys.gemini)),
            google_speech: secret(var("GOOGLE_SPEECH_API_KEY").or(fc.api_keys.google_speech)),
            openai: secret(var("OPENAI_API_KEY").or(fc.api_keys.openai)),
            deepgram: secret(var("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
            elevenlabs: secret(var("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
        };

        let telegram = TelegramConfig {
            poll_interval: Duration::from_millis(
                parse_number(var("VOICE_RELAY_POLL_INTERVAL_MS"), "VOICE_RELAY_POLL_INTERVAL_MS")?
                    .or(fc.telegram.poll_interval_ms)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        };

        let defaults = GeminiConfig::default();
        let gemini = GeminiConfig {
            model: var("GEMINI_MODEL")
                .or(fc.gemini.model)
                .unwrap_or(defaults.model),
            temperature: parse_number(var("GEMINI_TEMPERATURE"), "GEMINI_TEMPERATURE")?
                .or(fc.gemini.temperature)
                .unwrap_or(defaults.temperature),
            max_output_tokens: parse_number(var("GEMINI_MAX_OUTPUT_TOKENS"), "GEMINI_MAX_OUTPUT_TOKENS")?
                .or(fc.gemini.max_output_tokens)
                .unwrap_or(defaults.max_output_tokens),
            system_instruction: fc
                .gemini
                .system_instruction
                .unwrap_or(defaults.system_instruction),
            base_url: var("GEMINI_BASE_URL").or(fc.gemini.base_url),
        };

        let stt_provider = var("VOICE_RELAY_STT_PROVIDER")
            .or(fc.stt.provider)
            .map(|name| SttProvider::parse(&name))
            .transpose()?
            .unwrap_or(SttProvider::Google);
        let stt = SttConfig {
            provider: stt_provider,
            model: var("VOICE_RELAY_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| default_stt_model(stt_provider).to_string()),
            language: var("VOICE_RELAY_STT_LANGUAGE").or(fc.stt.language),
            silence_gate: var("VOICE_RELAY_SILENCE_GATE")
                .and_then(|v| parse_bool(&v))
                .or(fc.stt.silence_gate)
                .unwrap_or(false),
        };

        let tts_provider = var("VOICE_RELAY_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map(|name| TtsProvider::parse(&name))
            .transpose()?
            .unwrap_or(TtsProvider::Google);
        let (default_voice, default_model) = default_tts_voice_model(tts_provider);
        let tts = TtsConfig {
            provider: tts_provider,
            language: var("VOICE_RELAY_TTS_LANGUAGE")
                .or(fc.tts.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            voice: var("VOICE_RELAY_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| default_voice.to_string()),
            model: var("VOICE_RELAY_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| default_model.to_string()),
        };

        let sample_rate = parse_number(var("VOICE_RELAY_SAMPLE_RATE"), "VOICE_RELAY_SAMPLE_RATE")?
            .or(fc.audio.sample_rate)
            .unwrap_or(SAMPLE_RATE);
        if !(8_000..=48_000).contains(&sample_rate) {
            return Err(Error::Config(format!(
                "sample rate {sample_rate} Hz is outside 8000..=48000"
            )));
        }

        let audio = AudioConfig {
            sample_rate,
            temp_dir: var("VOICE_RELAY_TEMP_DIR")
                .or(fc.audio.temp_dir)
                .map(PathBuf::from),
            ffmpeg: var("VOICE_RELAY_FFMPEG")
                .and_then(|v| parse_bool(&v))
                .or(fc.audio.ffmpeg)
                .unwrap_or(true),
        };

        Ok(Self {
            telegram,
            gemini,
            stt,
            tts,
            audio,
            api_keys,
        })
    }

    /// The Telegram bot token
    ///
    /// # Errors
    ///
    /// Returns error if `TELEGRAM_BOT_TOKEN` is not set
    pub fn telegram_token(&self) -> Result<SecretString> {
        self.api_keys
            .telegram
            .clone()
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is required".to_string()))
    }

    /// The Gemini API key
    ///
    /// # Errors
    ///
    /// Returns error if `GEMINI_API_KEY` is not set
    pub fn gemini_key(&self) -> Result<SecretString> {
        self.api_keys
            .gemini
            .clone()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is required".to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{name} is not a valid number: {v}")))
        })
        .transpose()
}
