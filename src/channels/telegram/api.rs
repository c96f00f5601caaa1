//! Raw Telegram Bot API calls

use std::path::Path;

use secrecy::ExposeSecret;

use super::types::{
    API_BASE, BotCommand, BotUser, FILE_BASE, GetFileRequest, SendChatActionRequest,
    SendMessageRequest, SetMyCommandsRequest, TelegramFile, TelegramResponse,
};
use crate::{Error, Result};

impl super::TelegramChannel {
    pub(super) fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}{}/{method}", self.token.expose_secret())
    }

    /// Send a plain text message to a chat
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id: reply_to,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body_lower = body.to_lowercase();

            if body_lower.contains("chat not found")
                || body_lower.contains("bot was blocked by the user")
            {
                return Err(Error::Channel(format!(
                    "Telegram chat {chat_id} not reachable: {body}"
                )));
            }

            return Err(Error::Channel(format!(
                "Telegram API error: {status} - {body}"
            )));
        }

        tracing::debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    /// Delete webhook (switch to polling mode)
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn delete_webhook(&self) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("deleteWebhook"))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram deleteWebhook error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram deleteWebhook error: {status} - {body}"
            )));
        }

        tracing::info!("Telegram webhook deleted");
        Ok(())
    }

    /// Download a file by `file_id` via `getFile`
    ///
    /// Returns the file bytes and Telegram's `file_path`.
    ///
    /// # Errors
    ///
    /// Returns error if the API request or download fails
    pub async fn download_file(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
        let response = self
            .client
            .post(self.method_url("getFile"))
            .json(&GetFileRequest { file_id })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getFile error: {e}")))?;

        let parsed: TelegramResponse<TelegramFile> = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getFile parse error: {e}")))?;

        let file = parsed.into_result("getFile")?;
        let file_path = file.file_path.ok_or_else(|| {
            Error::Channel("Telegram getFile returned no file_path".to_string())
        })?;

        let download_url = format!("{FILE_BASE}{}/{file_path}", self.token.expose_secret());
        let response = self
            .client
            .get(&download_url)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram file download error: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "Telegram file download error: {}",
                response.status()
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Channel(format!("Telegram file download read error: {e}")))?;

        tracing::debug!(
            file_path = %file_path,
            bytes = data.len(),
            reported = ?file.file_size,
            "Telegram file downloaded"
        );
        Ok((data.to_vec(), file_path))
    }

    /// Sync bot commands with Telegram via `setMyCommands`
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn sync_commands(&self, commands: &[BotCommand]) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("setMyCommands"))
            .json(&SetMyCommandsRequest { commands })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram setMyCommands error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram setMyCommands error: {status} - {body}"
            )));
        }

        tracing::info!(count = commands.len(), "Telegram commands synced");
        Ok(())
    }

    /// Send a chat action (e.g. `typing`, `record_voice`)
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendChatAction"))
            .json(&SendChatActionRequest { chat_id, action })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram sendChatAction error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram sendChatAction error: {status} - {body}"
            )));
        }

        Ok(())
    }

    /// Validate the bot token by calling `getMe`
    ///
    /// Returns the bot's username.
    ///
    /// # Errors
    ///
    /// Returns error if the token is invalid
    pub async fn get_me(&self) -> Result<String> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getMe error: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel("Invalid Telegram bot token".to_string()));
        }

        let parsed: TelegramResponse<BotUser> = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getMe parse error: {e}")))?;
        let bot = parsed.into_result("getMe")?;

        tracing::debug!(bot_id = bot.id, "Telegram bot identified");
        Ok(bot.username.unwrap_or_default())
    }

    /// Upload an audio file and send it as a voice message
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the API request fails
    pub async fn send_voice_file(
        &self,
        chat_id: i64,
        audio: &Path,
        duration_secs: Option<u32>,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let data = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map_or_else(|| "reply.mp3".to_string(), |n| n.to_string_lossy().into_owned());
        let mime = mime_for(audio);

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| Error::Channel(format!("Telegram sendVoice error: {e}")))?;

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("voice", part);
        if let Some(duration) = duration_secs {
            form = form.text("duration", duration.to_string());
        }
        if let Some(reply_to) = reply_to {
            form = form.text("reply_to_message_id", reply_to.to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendVoice"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram sendVoice error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram sendVoice error: {status} - {body}"
            )));
        }

        tracing::debug!(chat_id, ?duration_secs, "Telegram voice message sent");
        Ok(())
    }
}

/// MIME type Telegram expects for a voice upload
fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("ogg" | "oga" | "opus") => "audio/ogg",
        Some("wav") => "audio/wav",
        _ => "audio/mpeg",
    }
}
