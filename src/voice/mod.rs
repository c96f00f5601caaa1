//! Voice processing module
//!
//! Converts inbound audio to canonical WAV, transcribes it, synthesizes the
//! reply and keeps track of every temporary file along the way.

mod artifact;
mod normalize;
mod pipeline;
mod recognizer;
mod recording;
mod stt;
mod synthesizer;
mod tts;

pub use artifact::{ArtifactScope, AudioEncoding, Stage, TempArtifact, TempStore, remove_artifact};
pub use normalize::{
    AudioNormalizer, DecodedAudio, SAMPLE_RATE, decode_file, resample, samples_to_wav,
    write_pcm_wav,
};
pub use pipeline::{PipelineOutcome, PipelineRun, PipelineState, VoicePipeline, VoiceReply};
pub use recognizer::{HttpRecognizer, SttProvider};
pub use recording::{CALIBRATION_SECS, Calibration, DEFAULT_ENERGY_THRESHOLD, Recording};
pub use stt::{SpeechRecognizer, SpeechToText};
pub use synthesizer::{HttpSynthesizer, TtsProvider, split_text};
pub use tts::{DEFAULT_LANGUAGE, SpeechSynthesizer, SynthesizedSpeech, TextToSpeech, mp3_duration_secs};
