//! Message dispatcher
//!
//! Routes each incoming chat message to the right handler: commands get a
//! canned reply, text goes straight to the language model, voice notes run
//! through the [`VoicePipeline`]. Every message is handled on its own task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::channels::{Attachment, BotCommand, Channel, IncomingMessage, MessageBody, OutgoingMessage};
use crate::error::GENERIC_FAILURE_MESSAGE;
use crate::llm::TextResponder;
use crate::voice::{AudioEncoding, VoicePipeline};
use crate::{PipelineFailure, Result};

/// Reply to `/start`
pub const WELCOME_MESSAGE: &str = "🤖 Welcome to Gemini AI Voice Bot!\n\n\
I can help you with:\n\
• Ask me questions and get AI-powered responses\n\
• Send me voice messages and get spoken answers back\n\
• Have conversations about any topic\n\
• Use /help for more information\n\n\
Just send me a text or voice message to get started!";

/// Reply to `/help`
pub const HELP_MESSAGE: &str = "🆘 Help - Gemini AI Voice Bot\n\n\
Commands:\n\
/start - Start the bot\n\
/help - Show this help message\n\n\
How to use:\n\
• Send any text message and I'll respond with AI-generated content\n\
• Send a voice message and I'll transcribe it, answer, and reply with voice\n\
• Ask questions, request explanations, or have conversations\n\n\
Features:\n\
• Powered by Google's Gemini AI\n\
• Speech recognition and synthesis for voice messages\n\
• Intelligent conversational responses\n\
• Multi-language support";

/// Reply to photos, stickers and other content we can't handle
pub const UNSUPPORTED_MESSAGE: &str = "❌ Sorry, I only support text and voice messages.\n\
Please send me a text or voice message to get started!";

/// Reply when the model produced nothing for a text message
pub const EMPTY_RESPONSE_MESSAGE: &str = "❌ Sorry, I couldn't generate a response. Please try again.";

/// Reply to voice messages when speech recognition is not configured
pub const VOICE_DISABLED_MESSAGE: &str = "🎤 Voice messages are not available right now.\n\
Please send me a text message instead.";

/// Commands published to the platform's command menu
#[must_use]
pub fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Start the bot"),
        BotCommand::new("help", "Show help information"),
    ]
}

/// Dispatches chat messages to the model and the voice pipeline
#[derive(Clone)]
pub struct Bot {
    channel: Arc<dyn Channel>,
    responder: Arc<dyn TextResponder>,
    pipeline: Option<VoicePipeline>,
}

impl Bot {
    /// Create a text-only dispatcher over `channel`
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>, responder: Arc<dyn TextResponder>) -> Self {
        Self {
            channel,
            responder,
            pipeline: None,
        }
    }

    /// Enable voice messages
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: VoicePipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Handle messages from `rx` until the sender side closes
    ///
    /// Each message gets its own task; nothing bounds how many run at once.
    /// Returns after every in-flight handler has finished.
    pub async fn run(&self, mut rx: mpsc::Receiver<IncomingMessage>) {
        let mut tasks = JoinSet::new();
        tracing::info!(channel = self.channel.name(), "message handler started");

        while let Some(msg) = rx.recv().await {
            let bot = self.clone();
            tasks.spawn(async move { bot.dispatch(msg).await });

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        tracing::info!(channel = self.channel.name(), "message handler stopped");
    }

    /// Handle one message, logging instead of returning errors
    pub async fn dispatch(&self, msg: IncomingMessage) {
        if let Err(e) = self.handle(msg).await {
            tracing::error!(error = %e, "failed to handle message");
        }
    }

    /// Route one message to its handler
    ///
    /// # Errors
    ///
    /// Returns error if a reply cannot be delivered
    pub async fn handle(&self, msg: IncomingMessage) -> Result<()> {
        match &msg.body {
            MessageBody::Command { name, .. } => self.handle_command(&msg, name).await,
            MessageBody::Text(text) => self.handle_text(&msg, text).await,
            MessageBody::Voice(attachment) => self.handle_voice(&msg, attachment).await,
            MessageBody::Unsupported { kind } => {
                tracing::info!(chat = %msg.channel_id, kind = %kind, "unsupported message");
                self.reply(&msg, UNSUPPORTED_MESSAGE).await
            }
        }
    }

    async fn handle_command(&self, msg: &IncomingMessage, name: &str) -> Result<()> {
        match name {
            "start" => {
                tracing::info!(chat = %msg.channel_id, user = %msg.sender_name, "start command");
                self.reply(msg, WELCOME_MESSAGE).await
            }
            "help" => self.reply(msg, HELP_MESSAGE).await,
            other => {
                tracing::debug!(command = other, "ignoring unknown command");
                Ok(())
            }
        }
    }

    async fn handle_text(&self, msg: &IncomingMessage, text: &str) -> Result<()> {
        tracing::info!(
            chat = %msg.channel_id,
            sender = %msg.sender_id,
            chars = text.chars().count(),
            "text message received"
        );

        if let Err(e) = self.channel.send_typing(&msg.channel_id).await {
            tracing::debug!(error = %e, "typing indicator failed");
        }

        match self.responder.respond(text).await {
            Ok(Some(reply)) if !reply.trim().is_empty() => {
                self.reply(msg, &format!("🤖 {}", reply.trim())).await
            }
            Ok(_) => {
                tracing::warn!(chat = %msg.channel_id, "empty response from language model");
                self.reply(msg, EMPTY_RESPONSE_MESSAGE).await
            }
            Err(e) => {
                tracing::error!(error = %e, chat = %msg.channel_id, "text generation failed");
                self.reply(msg, GENERIC_FAILURE_MESSAGE).await
            }
        }
    }

    async fn handle_voice(&self, msg: &IncomingMessage, attachment: &Attachment) -> Result<()> {
        tracing::info!(
            chat = %msg.channel_id,
            sender = %msg.sender_id,
            kind = ?attachment.kind,
            mime = %attachment.mime_type,
            duration = ?attachment.duration_secs,
            "voice message received"
        );

        let Some(pipeline) = &self.pipeline else {
            tracing::warn!(chat = %msg.channel_id, "voice message ignored, voice is disabled");
            return self.reply(msg, VOICE_DISABLED_MESSAGE).await;
        };

        if let Err(e) = self.channel.send_recording(&msg.channel_id).await {
            tracing::debug!(error = %e, "recording indicator failed");
        }

        let audio = match self.channel.download(attachment).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    reason = %PipelineFailure::UnexpectedFailure,
                    "voice download failed"
                );
                return self.reply(msg, GENERIC_FAILURE_MESSAGE).await;
            }
        };

        let encoding = AudioEncoding::from_mime(&attachment.mime_type);
        let outcome = pipeline.process_bytes(&audio, encoding, &[]).await;

        let reply = match outcome.result {
            Ok(reply) => reply,
            Err(reason) => {
                tracing::warn!(
                    chat = %msg.channel_id,
                    reason = %reason,
                    trace = ?outcome.run.history(),
                    "voice pipeline failed"
                );
                return self.reply(msg, GENERIC_FAILURE_MESSAGE).await;
            }
        };

        tracing::debug!(trace = ?outcome.run.history(), "voice pipeline delivered");

        if let Err(e) = self
            .channel
            .send_voice(
                &msg.channel_id,
                reply.speech.audio.path(),
                reply.speech.duration_secs,
                Some(&msg.id),
            )
            .await
        {
            tracing::error!(error = %e, chat = %msg.channel_id, "voice reply upload failed");
        }

        let text = format!("🎤 {}\n\n🤖 {}", reply.transcript, reply.reply);
        self.reply(msg, &text).await
    }

    async fn reply(&self, msg: &IncomingMessage, content: &str) -> Result<()> {
        self.channel
            .send(OutgoingMessage::text(msg.channel_id.clone(), content.to_string()))
            .await
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(
            error = %e,
            reason = %PipelineFailure::UnexpectedFailure,
            "message handler task failed"
        );
    }
}
