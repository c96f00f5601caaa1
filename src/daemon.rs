//! Daemon - the main relay service
//!
//! Builds the Gemini client, the voice pipeline and the Telegram channel from
//! [`Config`], then dispatches messages until interrupted.

use std::sync::Arc;

use secrecy::SecretString;

use crate::bot::{Bot, bot_commands};
use crate::channels::{Channel, TelegramChannel};
use crate::llm::{GeminiClient, TextResponder};
use crate::voice::{
    AudioNormalizer, HttpRecognizer, HttpSynthesizer, SpeechRecognizer, SpeechSynthesizer,
    SpeechToText, SttProvider, TempStore, TextToSpeech, TtsProvider, VoicePipeline,
};
use crate::{Config, Error, Result};

/// Build the Gemini text responder
///
/// # Errors
///
/// Returns error if `GEMINI_API_KEY` is missing
pub fn build_responder(config: &Config) -> Result<Arc<dyn TextResponder>> {
    let client = GeminiClient::new(config.gemini_key()?, &config.gemini)?;
    tracing::info!(model = client.model(), "gemini client initialized");
    Ok(Arc::new(client))
}

/// Build the configured speech recognition backend
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_recognizer(config: &Config) -> Result<Arc<dyn SpeechRecognizer>> {
    let provider = config.stt.provider;
    let (key, env_var) = match provider {
        SttProvider::Google => (&config.api_keys.google_speech, "GOOGLE_SPEECH_API_KEY"),
        SttProvider::Whisper => (&config.api_keys.openai, "OPENAI_API_KEY"),
        SttProvider::Deepgram => (&config.api_keys.deepgram, "DEEPGRAM_API_KEY"),
    };
    let key = required_key(key.as_ref(), env_var)?;

    let recognizer = HttpRecognizer::new(
        provider,
        key,
        config.stt.model.clone(),
        config.stt.language.clone(),
    )?;
    tracing::info!(?provider, model = %config.stt.model, "speech recognizer initialized");
    Ok(Arc::new(recognizer))
}

/// Build the configured speech synthesis backend
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_synthesizer(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    let tts = &config.tts;
    let synthesizer = match tts.provider {
        TtsProvider::Google => HttpSynthesizer::new_google(),
        TtsProvider::OpenAI => HttpSynthesizer::new_openai(
            required_key(config.api_keys.openai.as_ref(), "OPENAI_API_KEY")?,
            tts.voice.clone(),
            tts.model.clone(),
        )?,
        TtsProvider::ElevenLabs => HttpSynthesizer::new_elevenlabs(
            required_key(config.api_keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")?,
            tts.voice.clone(),
            tts.model.clone(),
        )?,
    };
    tracing::info!(provider = ?tts.provider, language = %tts.language, "speech synthesizer initialized");
    Ok(Arc::new(synthesizer))
}

/// Temp store rooted at the configured directory
#[must_use]
pub fn build_store(config: &Config) -> TempStore {
    config
        .audio
        .temp_dir
        .as_ref()
        .map_or_else(TempStore::default, TempStore::new)
}

/// Assemble the voice pipeline around `responder`
///
/// # Errors
///
/// Returns error if a speech backend cannot be built
pub fn build_pipeline(config: &Config, responder: Arc<dyn TextResponder>) -> Result<VoicePipeline> {
    let store = build_store(config);

    let mut normalizer = AudioNormalizer::new(store.clone(), config.audio.sample_rate);
    if !config.audio.ffmpeg {
        normalizer = normalizer.with_ffmpeg(None);
    }

    let stt = SpeechToText::new(build_recognizer(config)?).with_silence_gate(config.stt.silence_gate);
    let tts = TextToSpeech::new(build_synthesizer(config)?, store.clone())
        .with_default_language(config.tts.language.clone());

    tracing::debug!(temp_dir = %store.dir().display(), "voice pipeline assembled");
    Ok(VoicePipeline::new(store, normalizer, stt, responder, tts))
}

/// Voice pipeline, or `None` when a speech backend is not configured
///
/// Missing speech credentials leave the bot running text-only.
#[must_use]
pub fn build_voice(config: &Config, responder: Arc<dyn TextResponder>) -> Option<VoicePipeline> {
    match build_pipeline(config, responder) {
        Ok(pipeline) => Some(pipeline),
        Err(e) => {
            tracing::warn!(error = %e, "voice messages disabled");
            None
        }
    }
}

fn required_key(key: Option<&SecretString>, env_var: &str) -> Result<SecretString> {
    key.cloned()
        .ok_or_else(|| Error::Config(format!("{env_var} not set")))
}

/// The relay daemon - owns the Telegram channel and the bot
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing or Telegram rejects the token
    pub async fn run(self) -> Result<()> {
        let token = self.config.telegram_token()?;
        let responder = build_responder(&self.config)?;
        let pipeline = build_voice(&self.config, Arc::clone(&responder));

        let (mut telegram, rx) = TelegramChannel::with_receiver(token);
        telegram.connect().await?;

        if let Err(e) = telegram.set_commands(&bot_commands()).await {
            tracing::warn!(error = %e, "failed to publish bot commands");
        }

        let poller = telegram.start_polling(self.config.telegram.poll_interval)?;
        let voice = pipeline.is_some();
        let mut bot = Bot::new(Arc::new(telegram), responder);
        if let Some(pipeline) = pipeline {
            bot = bot.with_pipeline(pipeline);
        }

        tracing::info!(
            model = %self.config.gemini.model,
            stt = ?self.config.stt.provider,
            tts = ?self.config.tts.provider,
            voice,
            "voice-relay running"
        );

        tokio::select! {
            () = bot.run(rx) => {
                tracing::warn!("Telegram message stream ended");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("shutdown requested");
            }
        }

        poller.abort();
        Ok(())
    }
}
