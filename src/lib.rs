//! voice-relay - Telegram relay bot for Gemini with voice support
//!
//! This library provides:
//! - Voice processing (audio normalization, STT, TTS, temp file cleanup)
//! - The voice pipeline state machine
//! - A Gemini text responder
//! - The Telegram channel adapter and message dispatcher
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Telegram Bot API                    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ getUpdates / sendVoice
//! ┌────────────────────▼────────────────────────────────┐
//! │                      Bot                             │
//! │   /start  │  /help  │  text  │  voice  │  other     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Voice Pipeline                       │
//! │  Normalize → Transcribe → Generate → Synthesize     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod bot;
pub mod channels;
pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod voice;

pub use bot::Bot;
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, GENERIC_FAILURE_MESSAGE, PipelineFailure, Result};
pub use llm::{Conversation, ConversationTurn, GeminiClient, Role, TextResponder};
pub use voice::{PipelineOutcome, PipelineState, VoicePipeline, VoiceReply};
