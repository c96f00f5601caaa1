//! Telegram polling mode: getUpdates loop and message conversion

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::dedup::UpdateDedup;
use super::types::API_BASE;
use crate::channels::{Attachment, AttachmentKind, IncomingMessage, MessageBody};
use crate::{Error, Result};

/// Long-poll timeout passed to getUpdates
const LONG_POLL_SECS: u64 = 30;

/// Response from Telegram getUpdates API
#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<PollingUpdate>,
    description: Option<String>,
}

/// A single update from getUpdates
#[derive(Debug, Deserialize)]
struct PollingUpdate {
    update_id: i64,
    message: Option<PollingMessage>,
}

/// Message from a polling update
#[derive(Debug, Deserialize)]
struct PollingMessage {
    message_id: i64,
    chat: PollingChat,
    from: Option<PollingUser>,
    text: Option<String>,
    voice: Option<PollingVoice>,
    audio: Option<PollingAudio>,
    document: Option<PollingDocument>,
    photo: Option<serde_json::Value>,
    sticker: Option<serde_json::Value>,
    video: Option<serde_json::Value>,
    video_note: Option<serde_json::Value>,
}

/// Voice message from polling
#[derive(Debug, Deserialize)]
struct PollingVoice {
    file_id: String,
    duration: Option<u32>,
    mime_type: Option<String>,
}

/// Audio from polling
#[derive(Debug, Deserialize)]
struct PollingAudio {
    file_id: String,
    duration: Option<u32>,
    file_name: Option<String>,
    mime_type: Option<String>,
}

/// Document from polling
#[derive(Debug, Deserialize)]
struct PollingDocument {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
}

/// Chat info from polling
#[derive(Debug, Deserialize)]
struct PollingChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

/// User info from polling
#[derive(Debug, Deserialize)]
struct PollingUser {
    id: i64,
    is_bot: bool,
    first_name: String,
}

impl super::TelegramChannel {
    /// Spawn a background task that polls Telegram's getUpdates API
    ///
    /// Waits `interval` between polls and forwards received messages into the
    /// mpsc channel. Deletes any existing webhook before starting to avoid
    /// conflicts.
    ///
    /// # Errors
    ///
    /// Returns error if the channel was created without a receiver
    pub fn start_polling(&self, interval: Duration) -> Result<tokio::task::JoinHandle<()>> {
        let token = self.token.clone();
        let client = self.client.clone();
        let tx = self.message_tx.clone().ok_or_else(|| {
            Error::Channel("polling requires a receiver (use with_receiver)".to_string())
        })?;

        Ok(tokio::spawn(async move {
            polling_loop(token, client, tx, interval).await;
        }))
    }
}

/// Run the polling loop (background task)
///
/// Returns once the receiving side of `tx` is dropped.
async fn polling_loop(
    token: SecretString,
    client: reqwest::Client,
    tx: mpsc::Sender<IncomingMessage>,
    interval: Duration,
) {
    let delete_url = format!("{API_BASE}{}/deleteWebhook", token.expose_secret());
    if let Err(e) = client.post(&delete_url).send().await {
        tracing::warn!(error = %e, "failed to delete Telegram webhook before polling");
    }

    let url = format!("{API_BASE}{}/getUpdates", token.expose_secret());
    let mut offset: Option<i64> = None;
    let mut dedup = UpdateDedup::default();

    tracing::info!("Telegram polling started");

    loop {
        let mut params = serde_json::json!({
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            params["offset"] = serde_json::json!(off);
        }

        match client.post(&url).json(&params).send().await {
            Ok(resp) => match resp.json::<GetUpdatesResponse>().await {
                Ok(updates) if updates.ok => {
                    for update in &updates.result {
                        offset = Some(update.update_id + 1);

                        if dedup.is_duplicate(update.update_id) {
                            tracing::debug!(update_id = update.update_id, "skipping duplicate update");
                            continue;
                        }

                        let Some(msg) = update_to_incoming(update) else {
                            continue;
                        };

                        if tx.send(msg).await.is_err() {
                            tracing::info!("message receiver closed, stopping Telegram polling");
                            return;
                        }
                    }
                }
                Ok(updates) => {
                    tracing::warn!(
                        description = updates.description.as_deref().unwrap_or_default(),
                        "Telegram getUpdates rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse Telegram updates");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Telegram getUpdates error");
            }
        }

        if tx.is_closed() {
            return;
        }

        tokio::time::sleep(interval).await;
    }
}

/// Split `/command@bot args` into `("command", "args")`
///
/// Returns `None` if `text` is not a command.
#[must_use]
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(h, a)| (h, a.trim()));
    let name = head.split('@').next().unwrap_or_default();

    if name.is_empty() {
        return None;
    }

    Some((name.to_lowercase(), args.to_string()))
}

/// Classify a message's content
fn message_body(msg: &PollingMessage) -> MessageBody {
    if let Some(voice) = &msg.voice {
        return MessageBody::Voice(Attachment {
            kind: AttachmentKind::Voice,
            file_id: voice.file_id.clone(),
            mime_type: voice.mime_type.clone().unwrap_or_else(|| "audio/ogg".to_string()),
            filename: None,
            duration_secs: voice.duration,
        });
    }

    if let Some(audio) = &msg.audio {
        return MessageBody::Voice(Attachment {
            kind: AttachmentKind::Audio,
            file_id: audio.file_id.clone(),
            mime_type: audio.mime_type.clone().unwrap_or_else(|| "audio/mpeg".to_string()),
            filename: audio.file_name.clone(),
            duration_secs: audio.duration,
        });
    }

    if let Some(doc) = &msg.document {
        let mime_type = doc
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if AttachmentKind::from_mime(&mime_type) == AttachmentKind::Audio {
            return MessageBody::Voice(Attachment {
                kind: AttachmentKind::Audio,
                file_id: doc.file_id.clone(),
                mime_type,
                filename: doc.file_name.clone(),
                duration_secs: None,
            });
        }
        return MessageBody::Unsupported {
            kind: "document".to_string(),
        };
    }

    if let Some(text) = msg.text.as_deref().filter(|t| !t.trim().is_empty()) {
        return match parse_command(text) {
            Some((name, args)) => MessageBody::Command { name, args },
            None => MessageBody::Text(text.to_string()),
        };
    }

    let kind = if msg.photo.is_some() {
        "photo"
    } else if msg.sticker.is_some() {
        "sticker"
    } else if msg.video.is_some() || msg.video_note.is_some() {
        "video"
    } else {
        "other"
    };

    MessageBody::Unsupported {
        kind: kind.to_string(),
    }
}

/// Convert a polling update into an `IncomingMessage`
///
/// Skips non-message updates and messages sent by bots.
fn update_to_incoming(update: &PollingUpdate) -> Option<IncomingMessage> {
    let msg = update.message.as_ref()?;

    if msg.from.as_ref().is_some_and(|u| u.is_bot) {
        return None;
    }

    let sender_id = msg
        .from
        .as_ref()
        .map_or_else(|| msg.chat.id.to_string(), |u| u.id.to_string());

    let sender_name = msg
        .from
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |u| u.first_name.clone());

    Some(IncomingMessage {
        id: msg.message_id.to_string(),
        channel_id: msg.chat.id.to_string(),
        sender_id,
        sender_name,
        body: message_body(msg),
        is_dm: msg.chat.chat_type == "private",
    })
}
