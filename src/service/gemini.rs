//! Google Gemini implementation of [`CodeSynthesizer`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::models::FileSet;
use super::synthesizer::{CodeSynthesizer, SynthesisRequest, parse_generated_files};
use crate::errors::SynthesisError;
use crate::secret::Secret;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub struct GeminiSynthesizer {
    client: Client,
    api_key: Option<Secret>,
    model: String,
    base_url: String,
}

impl GeminiSynthesizer {
    pub fn new(
        api_key: Option<Secret>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SynthesisError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SynthesisError::Transport)?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_API_URL.to_string(),
        })
    }

    /// Point at a different API root (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(&self, key: &Secret, prompt: String) -> Result<String, SynthesisError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text: Some(prompt) }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", key.expose())])
            .json(&body)
            .send()
            .await
            .map_err(SynthesisError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status = %status, model = %self.model, "Gemini API error");
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(SynthesisError::Transport)?;
        Ok(parsed.text())
    }
}

#[async_trait]
impl CodeSynthesizer for GeminiSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<FileSet, SynthesisError> {
        let key = self
            .api_key
            .as_ref()
            .filter(|k| !k.is_blank())
            .ok_or(SynthesisError::MissingCredential)?;

        let prompt = request.prompt();
        debug!(mode = ?request.mode(), prompt_len = prompt.len(), model = %self.model, "requesting code");

        let text = self.generate(key, prompt).await?;
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyResponse);
        }

        let files = parse_generated_files(&text, request.language());
        if files.is_empty() {
            return Err(SynthesisError::NoFiles);
        }
        info!(files = files.len(), mode = ?request.mode(), "code generated");
        Ok(files)
    }
}

// ── Gemini API types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Text parts of the first candidate, concatenated.
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
