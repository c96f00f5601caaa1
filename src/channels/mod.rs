//! Messaging channel adapters
//!
//! The bot talks to the chat platform only through the `Channel` trait.

mod telegram;

use std::path::Path;

use async_trait::async_trait;

pub use telegram::{BotCommand, TelegramChannel, UpdateDedup, parse_command};

use crate::Result;

/// Type of attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Recorded voice note
    Voice,
    /// Audio file (MP3, WAV, OGG, etc.)
    Audio,
    /// Anything else (photos, video, stickers, documents)
    Other,
}

impl AttachmentKind {
    /// Determine attachment kind from MIME type
    #[must_use]
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.to_lowercase().starts_with("audio/") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

/// A file attached to an incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Type of attachment
    pub kind: AttachmentKind,

    /// Platform file identifier used for download
    pub file_id: String,

    /// MIME type
    pub mime_type: String,

    /// Original filename
    pub filename: Option<String>,

    /// Playback length reported by the platform
    pub duration_secs: Option<u32>,
}

/// What an incoming message carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Plain text
    Text(String),

    /// A `/command`, with the bot mention stripped
    Command {
        /// Command name without the slash
        name: String,
        /// Remaining text after the command
        args: String,
    },

    /// Voice note or audio file
    Voice(Attachment),

    /// A message the bot cannot handle (photo, sticker, ...)
    Unsupported {
        /// Short description for logs
        kind: String,
    },
}

/// A message from a channel
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Message identifier (platform-specific)
    pub id: String,

    /// Channel identifier
    pub channel_id: String,

    /// Sender identifier
    pub sender_id: String,

    /// Sender display name
    pub sender_name: String,

    /// Message content
    pub body: MessageBody,

    /// Whether this is a direct message
    pub is_dm: bool,
}

/// A message to send to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Channel identifier
    pub channel_id: String,

    /// Message content (plain text)
    pub content: String,

    /// Optional reply-to message ID
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    /// Create a simple `text` message
    #[must_use]
    pub fn text(channel_id: String, content: String) -> Self {
        Self {
            channel_id,
            content,
            reply_to: None,
        }
    }

    /// Create a `reply` message
    #[must_use]
    pub fn reply(channel_id: String, content: String, reply_to: String) -> Self {
        Self {
            channel_id,
            content,
            reply_to: Some(reply_to),
        }
    }
}

/// Trait for messaging channel adapters
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &'static str;

    /// Connect to the channel
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the channel
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send a text message
    async fn send(&self, message: OutgoingMessage) -> Result<()>;

    /// Upload an audio file as a voice message
    async fn send_voice(
        &self,
        channel_id: &str,
        audio: &Path,
        duration_secs: Option<u32>,
        reply_to: Option<&str>,
    ) -> Result<()>;

    /// Fetch the bytes of an attachment
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>>;

    /// Send typing indicator to show the bot is processing
    ///
    /// Default implementation is a no-op for channels that don't support typing
    async fn send_typing(&self, _channel_id: &str) -> Result<()> {
        Ok(())
    }

    /// Show a "recording voice" indicator
    ///
    /// Default implementation is a no-op
    async fn send_recording(&self, _channel_id: &str) -> Result<()> {
        Ok(())
    }

    /// Publish the command menu
    ///
    /// Default implementation is a no-op for channels without one
    async fn set_commands(&self, _commands: &[BotCommand]) -> Result<()> {
        Ok(())
    }
}
