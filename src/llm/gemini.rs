//! Google Gemini client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ConversationTurn, Role, TextResponder};
use crate::config::GeminiConfig;
use crate::{Error, Result};

/// Gemini REST API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini `generateContent` endpoint
///
/// Construct once and share; it holds no per-request state.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    system_instruction: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: SecretString, config: &GeminiConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("GEMINI_API_KEY is required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request<'a>(&'a self, contents: Vec<Content<'a>>) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &self.system_instruction,
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    async fn generate(&self, contents: Vec<Content<'_>>) -> Result<Option<String>> {
        let request = self.build_request(contents);

        let response = self
            .client
            .post(self.endpoint_url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("Gemini API error: {status} - {body}")));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("Failed to parse Gemini response: {e}")))?;

        let text = extract_text(&body);
        match &text {
            Some(text) => tracing::info!(model = %self.model, chars = text.len(), "received response from Gemini"),
            None => tracing::warn!(
                model = %self.model,
                block_reason = ?body.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()),
                "empty response received from Gemini"
            ),
        }

        Ok(text)
    }
}

#[async_trait]
impl TextResponder for GeminiClient {
    async fn respond(&self, prompt: &str) -> Result<Option<String>> {
        tracing::debug!(model = %self.model, chars = prompt.len(), "sending prompt to Gemini");
        self.generate(vec![Content {
            role: Some("user"),
            parts: vec![Part { text: prompt }],
        }])
        .await
    }

    async fn respond_to_conversation(&self, turns: &[ConversationTurn]) -> Result<Option<String>> {
        tracing::debug!(model = %self.model, turns = turns.len(), "sending conversation to Gemini");
        self.generate(turns_to_contents(turns)).await
    }
}

/// Map conversation turns onto Gemini roles (`assistant` is `model`)
fn turns_to_contents(turns: &[ConversationTurn]) -> Vec<Content<'_>> {
    turns
        .iter()
        .map(|turn| Content {
            role: Some(match turn.role() {
                Role::User => "user",
                Role::Assistant => "model",
            }),
            parts: vec![Part {
                text: turn.content(),
            }],
        })
        .collect()
}

/// Join the text parts of the first candidate
fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let text: String = candidate
        .content
        .as_ref()?
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
