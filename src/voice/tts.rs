//! Text-to-speech (TTS) processing

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;

use super::artifact::{AudioEncoding, Stage, TempArtifact, TempStore};
use crate::Result;
use crate::error::PipelineFailure;

/// Default synthesis language
pub const DEFAULT_LANGUAGE: &str = "en";

/// A remote speech synthesis backend producing MP3
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` spoken in `language`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;

    /// Whether the backend can speak `language`
    fn supports_language(&self, language: &str) -> bool;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Generated speech ready to send
#[derive(Debug)]
pub struct SynthesizedSpeech {
    /// MP3 file (deleted when dropped)
    pub audio: TempArtifact,
    /// Playback length, when the MP3 could be decoded
    pub duration_secs: Option<u32>,
}

/// Turns reply text into MP3 artifacts
#[derive(Clone)]
pub struct TextToSpeech {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: TempStore,
    default_language: String,
}

impl TextToSpeech {
    /// Wrap a synthesizer writing into `store`
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, store: TempStore) -> Self {
        Self {
            synthesizer,
            store,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Language used when the caller does not pass one
    #[must_use]
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Synthesize `text` into a new MP3 artifact
    ///
    /// Creates exactly one file on success and none on failure.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::SynthesisFailed`] if the text is empty,
    /// the language is unsupported, or the backend call fails
    pub async fn speak(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> std::result::Result<SynthesizedSpeech, PipelineFailure> {
        let language = language.unwrap_or(&self.default_language);
        let text = text.trim();

        if text.is_empty() {
            tracing::warn!("refusing to synthesize empty text");
            return Err(PipelineFailure::SynthesisFailed);
        }

        if !self.synthesizer.supports_language(language) {
            tracing::warn!(backend = self.synthesizer.name(), language, "unsupported TTS language");
            return Err(PipelineFailure::SynthesisFailed);
        }

        let audio = match self.synthesizer.synthesize(text, language).await {
            Ok(audio) if !audio.is_empty() => audio,
            Ok(_) => {
                tracing::error!(backend = self.synthesizer.name(), "TTS returned no audio");
                return Err(PipelineFailure::SynthesisFailed);
            }
            Err(e) => {
                tracing::error!(backend = self.synthesizer.name(), error = %e, "error in text to voice conversion");
                return Err(PipelineFailure::SynthesisFailed);
            }
        };

        let duration_secs = mp3_duration_secs(&audio);
        if duration_secs.is_none() {
            tracing::warn!(bytes = audio.len(), "could not decode synthesized MP3 for duration");
        }

        let artifact = self
            .store
            .write(&audio, AudioEncoding::Mp3, Stage::Synthesize)
            .map_err(|e| {
                tracing::error!(error = %e, "failed to write synthesized audio");
                PipelineFailure::SynthesisFailed
            })?;

        tracing::info!(
            path = %artifact.path().display(),
            bytes = audio.len(),
            language,
            "generated voice file"
        );

        Ok(SynthesizedSpeech {
            audio: artifact,
            duration_secs,
        })
    }
}

/// Decode MP3 bytes and return their length in whole seconds (rounded up)
///
/// Returns `None` if no frame could be decoded.
#[must_use]
pub fn mp3_duration_secs(mp3_data: &[u8]) -> Option<u32> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut seconds = 0.0_f64;
    let mut frames = 0usize;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let channels = frame.channels.max(1);
                #[allow(clippy::cast_precision_loss)]
                let per_channel = (frame.data.len() / channels) as f64;
                if frame.sample_rate > 0 {
                    seconds += per_channel / f64::from(frame.sample_rate);
                }
                frames += 1;
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => {
                tracing::debug!(error = %e, "MP3 decode error");
                break;
            }
        }
    }

    if frames == 0 {
        return None;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = seconds.ceil() as u32;
    Some(rounded.max(1))
}
