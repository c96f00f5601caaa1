//! HTTP speech recognition backends

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::recording::Recording;
use super::stt::SpeechRecognizer;
use crate::{Error, Result};

/// Google Web Speech API endpoint
const GOOGLE_SPEECH_URL: &str = "https://www.google.com/speech-api/v2/recognize";

/// OpenAI transcription endpoint
const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Deepgram pre-recorded audio endpoint
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// One line of a Google Web Speech response
#[derive(serde::Deserialize)]
struct GoogleSpeechLine {
    #[serde(default)]
    result: Vec<GoogleSpeechResult>,
}

#[derive(serde::Deserialize)]
struct GoogleSpeechResult {
    #[serde(default)]
    alternative: Vec<GoogleAlternative>,
}

#[derive(serde::Deserialize)]
struct GoogleAlternative {
    transcript: String,
    confidence: Option<f64>,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    /// Google Web Speech API
    Google,
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram
    Deepgram,
}

impl SttProvider {
    /// Parse a provider name from configuration
    ///
    /// # Errors
    ///
    /// Returns error for unknown names
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech recognizer backed by a hosted API
pub struct HttpRecognizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    language: Option<String>,
    provider: SttProvider,
}

impl HttpRecognizer {
    /// Create a recognizer for `provider`
    ///
    /// `model` is ignored by Google; `language` is an ISO/BCP-47 hint.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(
        provider: SttProvider,
        api_key: SecretString,
        model: String,
        language: Option<String>,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} speech recognition"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            provider,
        })
    }

    /// Transcribe using the Google Web Speech API
    async fn recognize_google(&self, recording: &Recording) -> Result<Option<String>> {
        let language = self.language.as_deref().unwrap_or("en-US");
        tracing::debug!(language, sample_rate = recording.sample_rate(), "starting Google transcription");

        let response = self
            .client
            .post(GOOGLE_SPEECH_URL)
            .query(&[
                ("client", "chromium"),
                ("lang", language),
                ("key", self.api_key.expose_secret()),
                ("pFilter", "0"),
            ])
            .header(
                "Content-Type",
                format!("audio/l16; rate={}", recording.sample_rate()),
            )
            .body(recording.pcm_le_bytes())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Google speech request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Google speech API error {status}: {body}")));
        }

        let body = response.text().await?;
        parse_google_response(&body)
    }

    /// Transcribe using `OpenAI` Whisper
    async fn recognize_whisper(&self, recording: &Recording) -> Result<Option<String>> {
        tracing::debug!(audio_bytes = recording.wav().len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(recording.wav().to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        let response = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        Ok(non_empty(result.text))
    }

    /// Transcribe using Deepgram
    async fn recognize_deepgram(&self, recording: &Recording) -> Result<Option<String>> {
        tracing::debug!(audio_bytes = recording.wav().len(), "starting Deepgram transcription");

        let mut query = vec![("model", self.model.as_str()), ("punctuate", "true")];
        if let Some(ref lang) = self.language {
            query.push(("language", lang.as_str()));
        }

        let response = self
            .client
            .post(DEEPGRAM_URL)
            .query(&query)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(recording.wav().to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let body = response.text().await?;
        parse_deepgram_response(&body)
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn recognize(&self, recording: &Recording) -> Result<Option<String>> {
        match self.provider {
            SttProvider::Google => self.recognize_google(recording).await,
            SttProvider::Whisper => self.recognize_whisper(recording).await,
            SttProvider::Deepgram => self.recognize_deepgram(recording).await,
        }
    }

    fn name(&self) -> &'static str {
        match self.provider {
            SttProvider::Google => "google",
            SttProvider::Whisper => "whisper",
            SttProvider::Deepgram => "deepgram",
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pick the transcript out of a Google Web Speech response
///
/// The body is one JSON object per line and usually starts with an empty
/// `{"result":[]}`. The alternative carrying a confidence score is the
/// final one; otherwise the first alternative wins.
fn parse_google_response(body: &str) -> Result<Option<String>> {
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parsed: GoogleSpeechLine = serde_json::from_str(line)?;
        let Some(result) = parsed.result.into_iter().next() else {
            continue;
        };

        let best = result
            .alternative
            .iter()
            .find(|a| a.confidence.is_some())
            .or_else(|| result.alternative.first());

        return Ok(best.and_then(|a| non_empty(a.transcript.clone())));
    }

    Ok(None)
}

/// Pick the first transcript out of a Deepgram response
fn parse_deepgram_response(body: &str) -> Result<Option<String>> {
    let result: DeepgramResponse = serde_json::from_str(body)?;

    let transcript = result
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default();

    Ok(non_empty(transcript))
}
