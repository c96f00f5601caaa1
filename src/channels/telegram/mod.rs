//! Telegram channel adapter
//!
//! Uses long polling for receiving messages and the Bot API for sending

mod api;
mod dedup;
mod polling;
mod types;

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;
use tokio::sync::mpsc;

use super::{Attachment, Channel, IncomingMessage, OutgoingMessage};
use crate::{Error, Result};

pub use dedup::UpdateDedup;
pub use polling::parse_command;
pub use types::BotCommand;

/// Capacity of the incoming message queue
const MESSAGE_QUEUE: usize = 100;

/// Telegram channel adapter
#[derive(Clone)]
pub struct TelegramChannel {
    token: SecretString,
    client: Client,
    message_tx: Option<mpsc::Sender<IncomingMessage>>,
    connected: bool,
}

impl TelegramChannel {
    /// Create a new Telegram channel adapter
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            client: Client::new(),
            message_tx: None,
            connected: false,
        }
    }

    /// Create with a message receiver for polling mode
    ///
    /// Returns the channel and a receiver for incoming messages
    #[must_use]
    pub fn with_receiver(token: SecretString) -> (Self, mpsc::Receiver<IncomingMessage>) {
        let (tx, rx) = mpsc::channel(MESSAGE_QUEUE);
        let mut channel = Self::new(token);
        channel.message_tx = Some(tx);
        (channel, rx)
    }
}

fn parse_chat_id(channel_id: &str) -> Result<i64> {
    channel_id
        .parse()
        .map_err(|_| Error::Channel("Invalid chat ID".to_string()))
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn connect(&mut self) -> Result<()> {
        let username = self.get_me().await?;
        self.connected = true;
        tracing::info!(bot = %username, "Telegram channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        tracing::info!("Telegram channel disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let chat_id = parse_chat_id(&message.channel_id)?;
        let reply_to = message.reply_to.as_ref().and_then(|id| id.parse().ok());

        self.send_message(chat_id, &message.content, reply_to).await
    }

    async fn send_voice(
        &self,
        channel_id: &str,
        audio: &Path,
        duration_secs: Option<u32>,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let chat_id = parse_chat_id(channel_id)?;
        let reply_to = reply_to.and_then(|id| id.parse().ok());

        self.send_voice_file(chat_id, audio, duration_secs, reply_to).await
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let (data, file_path) = self.download_file(&attachment.file_id).await?;
        tracing::debug!(file_path = %file_path, mime = %attachment.mime_type, "downloaded attachment");
        Ok(data)
    }

    async fn send_typing(&self, channel_id: &str) -> Result<()> {
        let chat_id = parse_chat_id(channel_id)?;
        self.send_chat_action(chat_id, "typing").await?;
        tracing::debug!(chat_id, "Telegram typing indicator sent");
        Ok(())
    }

    async fn send_recording(&self, channel_id: &str) -> Result<()> {
        let chat_id = parse_chat_id(channel_id)?;
        self.send_chat_action(chat_id, "record_voice").await
    }

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<()> {
        self.sync_commands(commands).await
    }
}
