//! Voice message pipeline
//!
//! Drives one voice message through normalize, transcribe, generate and
//! synthesize. Every intermediate file is tracked in an [`ArtifactScope`]
//! and is gone by the time the run returns; only the synthesized speech is
//! handed to the caller.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::artifact::{ArtifactScope, AudioEncoding, Stage, TempStore};
use super::normalize::AudioNormalizer;
use super::stt::SpeechToText;
use super::tts::{SynthesizedSpeech, TextToSpeech};
use crate::error::PipelineFailure;
use crate::llm::{ConversationTurn, Role, TextResponder};

/// Where a pipeline run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Message accepted, nothing done yet
    Received,
    /// Converting to canonical WAV
    Normalizing,
    /// Waiting on speech recognition
    Transcribing,
    /// Waiting on the language model
    Generating,
    /// Waiting on speech synthesis
    Synthesizing,
    /// Reply ready for the caller
    Delivered,
    /// Stopped early
    Failed(PipelineFailure),
}

impl PipelineState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed(_))
    }

    /// The state reached when the current stage succeeds
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Normalizing),
            Self::Normalizing => Some(Self::Transcribing),
            Self::Transcribing => Some(Self::Generating),
            Self::Generating => Some(Self::Synthesizing),
            Self::Synthesizing => Some(Self::Delivered),
            Self::Delivered | Self::Failed(_) => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Normalizing => write!(f, "normalizing"),
            Self::Transcribing => write!(f, "transcribing"),
            Self::Generating => write!(f, "generating"),
            Self::Synthesizing => write!(f, "synthesizing"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Trace of the states one run passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    history: Vec<PipelineState>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    /// A run in the `Received` state
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: vec![PipelineState::Received],
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.history
            .last()
            .copied()
            .unwrap_or(PipelineState::Received)
    }

    /// Every state visited, in order
    #[must_use]
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Whether the run visited `state`
    #[must_use]
    pub fn visited(&self, state: PipelineState) -> bool {
        self.history.contains(&state)
    }

    /// Move to the next stage
    ///
    /// Does nothing once the run is terminal.
    pub fn advance(&mut self) -> PipelineState {
        let current = self.state();
        if let Some(next) = current.next() {
            tracing::debug!(from = %current, to = %next, "pipeline transition");
            self.history.push(next);
        }
        self.state()
    }

    /// Stop the run with `reason`
    ///
    /// Does nothing once the run is terminal.
    pub fn fail(&mut self, reason: PipelineFailure) -> PipelineState {
        let current = self.state();
        if !current.is_terminal() {
            tracing::warn!(at = %current, %reason, "pipeline failed");
            self.history.push(PipelineState::Failed(reason));
        }
        self.state()
    }

    fn fail_with(&mut self, reason: PipelineFailure) -> PipelineFailure {
        self.fail(reason);
        reason
    }

    /// The failure reason, if the run failed
    #[must_use]
    pub fn failure(&self) -> Option<PipelineFailure> {
        match self.state() {
            PipelineState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Everything produced for one voice message
#[derive(Debug)]
pub struct VoiceReply {
    /// What the user said
    pub transcript: String,
    /// What the model answered
    pub reply: String,
    /// The answer as speech; the caller owns the file
    pub speech: SynthesizedSpeech,
}

/// Result of one run together with its trace
#[derive(Debug)]
pub struct PipelineOutcome {
    /// State trace
    pub run: PipelineRun,
    /// The reply, or why there is none
    pub result: std::result::Result<VoiceReply, PipelineFailure>,
}

/// Orchestrates the voice stages
///
/// Holds shared clients only; concurrent runs share nothing mutable.
#[derive(Clone)]
pub struct VoicePipeline {
    store: TempStore,
    normalizer: AudioNormalizer,
    stt: SpeechToText,
    responder: Arc<dyn TextResponder>,
    tts: TextToSpeech,
    language: Option<String>,
}

impl VoicePipeline {
    /// Assemble a pipeline from its stages
    #[must_use]
    pub fn new(
        store: TempStore,
        normalizer: AudioNormalizer,
        stt: SpeechToText,
        responder: Arc<dyn TextResponder>,
        tts: TextToSpeech,
    ) -> Self {
        Self {
            store,
            normalizer,
            stt,
            responder,
            tts,
            language: None,
        }
    }

    /// Reply language passed to the synthesizer
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Run the pipeline over audio received in memory
    ///
    /// The bytes are written to an inbound artifact first, which is removed
    /// before this returns.
    pub async fn process_bytes(
        &self,
        audio: &[u8],
        encoding: AudioEncoding,
        history: &[ConversationTurn],
    ) -> PipelineOutcome {
        let mut run = PipelineRun::new();
        let mut scope = ArtifactScope::new();

        let inbound = match self.store.write(audio, encoding, Stage::Inbound) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(error = %e, bytes = audio.len(), "failed to store inbound audio");
                run.fail(PipelineFailure::UnexpectedFailure);
                return PipelineOutcome {
                    run,
                    result: Err(PipelineFailure::UnexpectedFailure),
                };
            }
        };
        let input = inbound.path().to_path_buf();
        scope.track(inbound);

        let result = self.drive(&mut run, &mut scope, &input, history).await;
        finish(run, scope, result)
    }

    /// Run the pipeline over a file the caller owns
    ///
    /// The input file is never deleted.
    pub async fn process_file(&self, input: &Path, history: &[ConversationTurn]) -> PipelineOutcome {
        let mut run = PipelineRun::new();
        let mut scope = ArtifactScope::new();
        let result = self.drive(&mut run, &mut scope, input, history).await;
        finish(run, scope, result)
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        scope: &mut ArtifactScope,
        input: &Path,
        history: &[ConversationTurn],
    ) -> std::result::Result<VoiceReply, PipelineFailure> {
        run.advance();
        let wav = self
            .normalizer
            .normalize(input)
            .await
            .map_err(|reason| run.fail_with(reason))?;
        let wav_path = wav.path().to_path_buf();
        scope.track(wav);

        run.advance();
        let wav = scope
            .take(&wav_path)
            .ok_or_else(|| run.fail_with(PipelineFailure::UnexpectedFailure))?;
        let transcript = self
            .stt
            .transcribe(wav)
            .await
            .map_err(|reason| run.fail_with(reason))?;

        run.advance();
        let reply = self
            .generate(&transcript, history)
            .await
            .map_err(|reason| run.fail_with(reason))?;

        run.advance();
        let speech = self
            .tts
            .speak(&reply, self.language.as_deref())
            .await
            .map_err(|reason| run.fail_with(reason))?;

        run.advance();
        Ok(VoiceReply {
            transcript,
            reply,
            speech,
        })
    }

    async fn generate(
        &self,
        transcript: &str,
        history: &[ConversationTurn],
    ) -> std::result::Result<String, PipelineFailure> {
        let response = if history.is_empty() {
            self.responder.respond(transcript).await
        } else {
            let mut turns = history.to_vec();
            turns.push(ConversationTurn::new(Role::User, transcript));
            self.responder.respond_to_conversation(&turns).await
        };

        match response {
            Ok(Some(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!("language model returned an empty reply");
                Err(PipelineFailure::GenerationFailed)
            }
            Err(e) => {
                tracing::error!(error = %e, "language model request failed");
                Err(PipelineFailure::GenerationFailed)
            }
        }
    }
}

fn finish(
    run: PipelineRun,
    mut scope: ArtifactScope,
    result: std::result::Result<VoiceReply, PipelineFailure>,
) -> PipelineOutcome {
    let removed = scope.cleanup();
    tracing::debug!(removed, state = %run.state(), "pipeline run finished");
    PipelineOutcome { run, result }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_order() {
        let mut run = PipelineRun::new();
        for _ in 0..5 {
            run.advance();
        }
        assert_eq!(
            run.history(),
            &[
                PipelineState::Received,
                PipelineState::Normalizing,
                PipelineState::Transcribing,
                PipelineState::Generating,
                PipelineState::Synthesizing,
                PipelineState::Delivered,
            ]
        );
        assert!(run.state().is_terminal());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut run = PipelineRun::new();
        run.advance();
        run.fail(PipelineFailure::ConversionFailed);
        run.advance();
        run.fail(PipelineFailure::SynthesisFailed);

        assert_eq!(run.state(), PipelineState::Failed(PipelineFailure::ConversionFailed));
        assert_eq!(run.failure(), Some(PipelineFailure::ConversionFailed));
        assert_eq!(run.history().len(), 3);
    }

    #[test]
    fn test_failed_reachable_from_every_stage() {
        for steps in 0..5 {
            let mut run = PipelineRun::new();
            for _ in 0..steps {
                run.advance();
            }
            run.fail(PipelineFailure::UnexpectedFailure);
            assert_eq!(run.failure(), Some(PipelineFailure::UnexpectedFailure));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(PipelineState::Generating.to_string(), "generating");
        assert_eq!(
            PipelineState::Failed(PipelineFailure::NoSpeechDetected).to_string(),
            "failed (no speech detected)"
        );
    }
}
