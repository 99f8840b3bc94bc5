use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, SpeakerVoice, UsageMetadata};

/// Remote provider using an OpenAI-compatible HTTP API.
///
/// `base_url` is the chat completions endpoint; the embeddings and speech
/// endpoints are derived from it.
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    speech_model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            embedding_model: model.clone(),
            speech_model: "tts-1".to_string(),
            model,
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 500,
            default_temperature: 0.7,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: usize,
        temperature: f32,
    ) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_speech_model(mut self, model: impl Into<String>) -> Self {
        self.speech_model = model.into();
        self
    }

    /// Map the chat endpoint onto a sibling endpoint
    /// (e.g. `.../v1/chat/completions` -> `.../v1/embeddings`).
    fn endpoint(&self, path: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        if trimmed.ends_with(path) {
            trimmed.to_string()
        } else if let Some(root) = trimmed.strip_suffix("/chat/completions") {
            format!("{}/{}", root, path)
        } else if let Some(root) = trimmed.strip_suffix("/completions") {
            format!("{}/{}", root, path)
        } else {
            format!("{}/{}", trimmed, path)
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send(),
        )
        .await
        .with_context(|| format!("{} request timeout after {}s", what, timeout.as_secs()))?
        .with_context(|| format!("{} HTTP request failed", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error {}: {}", what, status, body);
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        let temperature = request.temperature.unwrap_or(self.default_temperature);

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let response = self.post_json(&self.base_url, &req_body, timeout, "LLM").await?;

        let resp_body: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .first()
            .context("LLM response has no choices")?;

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("embeddings");
        let req_body = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .post_json(&url, &req_body, self.default_timeout, "Embedding")
            .await?;

        let mut resp_body: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse Embedding response")?;

        // Providers may answer out of order; `index` is authoritative when present.
        resp_body.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        if resp_body.data.len() != texts.len() {
            anyhow::bail!(
                "Embedding response has {} vectors for {} inputs",
                resp_body.data.len(),
                texts.len()
            );
        }

        Ok(resp_body.data.into_iter().map(|d| d.embedding).collect())
    }

    /// The OpenAI speech endpoint reads with a single voice, so the first speaker's
    /// voice is used for the whole part.
    async fn synthesize_speech(&self, prompt: &str, speakers: &[SpeakerVoice]) -> Result<Vec<u8>> {
        let voice = speakers
            .first()
            .map(|s| s.voice.to_lowercase())
            .unwrap_or_else(|| "alloy".to_string());

        let url = self.endpoint("audio/speech");
        let req_body = SpeechRequest {
            model: self.speech_model.clone(),
            input: prompt.to_string(),
            voice,
            response_format: "pcm".to_string(),
        };

        let response = self
            .post_json(&url, &req_body, self.default_timeout, "Speech")
            .await?;

        let bytes = response
            .bytes()
            .await
            .context("Failed to read speech response body")?;
        Ok(bytes.to_vec())
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest {
    model: String,
    input: String,
    voice: String,
    response_format: String,
}
