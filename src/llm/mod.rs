//! Text generation
//!
//! The language model sits behind [`TextResponder`] so the bot and the voice
//! pipeline can be exercised without network access.

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Default instruction sent with every request
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful voice assistant. Provide clear, concise, and friendly responses. \
Keep your answers conversational and natural since they will be converted to speech. \
Avoid using special characters, markdown, or formatting that doesn't work well in speech. \
If asked about your capabilities, mention that you're a voice assistant powered by Gemini AI \
that can help with questions, conversations, and various tasks.";

/// Who said a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the bot
    User,
    /// The bot
    Assistant,
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
}

impl ConversationTurn {
    /// Create a turn
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Speaker
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Message text
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered, append-only conversation history
///
/// Turns are never edited or removed, and the history is not truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    /// Empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Append a user message
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(Role::User, content));
    }

    /// Append a bot reply
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(Role::Assistant, content));
    }

    /// All turns, oldest first
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no turns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Generates replies to user text
#[async_trait]
pub trait TextResponder: Send + Sync {
    /// Reply to a single prompt
    ///
    /// Returns `Ok(None)` when the model produced no text.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn respond(&self, prompt: &str) -> Result<Option<String>>;

    /// Reply given the whole conversation so far
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn respond_to_conversation(&self, turns: &[ConversationTurn]) -> Result<Option<String>>;
}
