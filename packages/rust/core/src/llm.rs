//! Language model client and response parsing helpers.
//!
//! Every model call in the pipeline goes through [`LanguageModel`]. The
//! production implementation talks to the Gemini REST API; tests plug in
//! canned responders.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use leadscout_shared::{LeadScoutError, Result};

const USER_AGENT: &str = concat!("LeadScout/", env!("CARGO_PKG_VERSION"));

/// Sampling knobs for a single generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 1500,
        }
    }
}

impl GenerationOptions {
    pub fn new(temperature: f32, max_output_tokens: u32) -> Self {
        Self {
            temperature,
            max_output_tokens,
        }
    }
}

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<String> {
        let endpoint = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_output_tokens,
            }
        });

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("gemini: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LeadScoutError::Auth(format!("gemini rejected the API key ({status})")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LeadScoutError::Network(format!(
                "gemini: HTTP {status}: {}",
                truncate_chars(&detail, 200)
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("gemini: {e}")))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LeadScoutError::empty("gemini returned no text"));
        }

        debug!(response_chars = text.len(), "generation complete");
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Remove Markdown code fences (```json ... ```) around a model response.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    slice_between(strip_fences(text), '{', '}')
}

/// Slice from the first `[` to the last `]`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    slice_between(strip_fences(text), '[', ']')
}

fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the JSON object embedded in a model response.
pub fn parse_json_object<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    let json = extract_json_object(text)
        .ok_or_else(|| LeadScoutError::malformed(format!("{what}: no JSON object in response")))?;
    serde_json::from_str(json).map_err(|e| LeadScoutError::malformed(format!("{what}: {e}")))
}

/// Parse the JSON array embedded in a model response.
pub fn parse_json_array<T: DeserializeOwned>(text: &str, what: &str) -> Result<Vec<T>> {
    let json = extract_json_array(text)
        .ok_or_else(|| LeadScoutError::malformed(format!("{what}: no JSON array in response")))?;
    serde_json::from_str(json).map_err(|e| LeadScoutError::malformed(format!("{what}: {e}")))
}

/// Cut `content` to `max_chars` characters and mark the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        format!("{}\n\n[... content truncated ...]", truncate_chars(content, max_chars))
    }
}

/// First `max_chars` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
