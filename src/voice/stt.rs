//! Speech-to-text (STT) processing

use std::sync::Arc;

use async_trait::async_trait;

use super::artifact::TempArtifact;
use super::recording::{CALIBRATION_SECS, Recording};
use crate::Result;
use crate::error::PipelineFailure;

/// A remote speech recognition backend
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize speech in a recording
    ///
    /// Returns `Ok(None)` when the backend processed the audio but found no
    /// intelligible speech.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response cannot be parsed
    async fn recognize(&self, recording: &Recording) -> Result<Option<String>>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Turns canonical WAV artifacts into text
#[derive(Clone)]
pub struct SpeechToText {
    recognizer: Arc<dyn SpeechRecognizer>,
    calibration_secs: f32,
    skip_silent: bool,
}

impl SpeechToText {
    /// Wrap a recognizer with default calibration settings
    #[must_use]
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            calibration_secs: CALIBRATION_SECS,
            skip_silent: false,
        }
    }

    /// Reject recordings with no voice activity before the remote call
    ///
    /// Off by default, so every recording reaches the backend.
    #[must_use]
    pub const fn with_silence_gate(mut self, enabled: bool) -> Self {
        self.skip_silent = enabled;
        self
    }

    /// Transcribe a normalized recording
    ///
    /// Consumes the artifact: the WAV file is deleted before this returns,
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`PipelineFailure::ConversionFailed`] if the WAV cannot be read
    /// - [`PipelineFailure::NoSpeechDetected`] if no speech was recognized
    /// - [`PipelineFailure::ServiceUnavailable`] if the backend request failed
    pub async fn transcribe(&self, wav: TempArtifact) -> std::result::Result<String, PipelineFailure> {
        let outcome = self.transcribe_artifact(&wav).await;
        let path = wav.path().to_path_buf();
        if !wav.remove() {
            tracing::debug!(path = %path.display(), "normalized audio was already gone");
        }
        outcome
    }

    async fn transcribe_artifact(&self, wav: &TempArtifact) -> std::result::Result<String, PipelineFailure> {
        let recording = Recording::open(wav.path()).await.map_err(|e| {
            tracing::error!(path = %wav.path().display(), error = %e, "failed to read normalized audio");
            PipelineFailure::ConversionFailed
        })?;

        self.transcribe_recording(&recording).await
    }

    /// Transcribe an in-memory recording
    ///
    /// # Errors
    ///
    /// See [`SpeechToText::transcribe`]
    pub async fn transcribe_recording(
        &self,
        recording: &Recording,
    ) -> std::result::Result<String, PipelineFailure> {
        let calibration = recording.calibrate(self.calibration_secs);

        if self.skip_silent && !recording.has_voice_activity(&calibration) {
            tracing::warn!(
                duration_secs = recording.duration_secs(),
                energy_threshold = calibration.energy_threshold,
                "could not understand the audio: no voice activity"
            );
            return Err(PipelineFailure::NoSpeechDetected);
        }

        tracing::debug!(
            backend = self.recognizer.name(),
            duration_secs = recording.duration_secs(),
            "starting transcription"
        );

        match self.recognizer.recognize(recording).await {
            Ok(Some(text)) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                tracing::info!(backend = self.recognizer.name(), chars = text.len(), "transcribed voice to text");
                Ok(text)
            }
            Ok(_) => {
                tracing::warn!(backend = self.recognizer.name(), "could not understand the audio");
                Err(PipelineFailure::NoSpeechDetected)
            }
            Err(e) => {
                tracing::error!(backend = self.recognizer.name(), error = %e, "speech recognition service error");
                Err(PipelineFailure::ServiceUnavailable)
            }
        }
    }
}
