use anyhow::{Context, Result};
use std::sync::Arc;

/// Core trait for the remote AI service: text generation, embeddings and speech.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Embed a batch of texts; one vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Read a dialogue aloud with one voice per speaker. Returns raw 16-bit mono PCM
    /// at 24 kHz.
    async fn synthesize_speech(&self, prompt: &str, speakers: &[SpeakerVoice]) -> Result<Vec<u8>>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            timeout_seconds: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A broadcast anchor and the prebuilt voice reading their lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerVoice {
    pub speaker: String,
    pub voice: String,
}

impl From<&common::SpeakerConfig> for SpeakerVoice {
    fn from(cfg: &common::SpeakerConfig) -> Self {
        Self {
            speaker: cfg.name.clone(),
            voice: cfg.voice.clone(),
        }
    }
}

pub mod gemini;
pub mod remote;

/// Build the provider selected by `llm.adapter` ("gemini" by default).
pub fn create_provider(cfg: &common::LlmConfig, api_key: &str) -> Result<Arc<dyn LlmProvider>> {
    let adapter = cfg.adapter.as_deref().unwrap_or("gemini");
    let timeout_secs = cfg.timeout_seconds.unwrap_or(120);

    match adapter {
        "gemini" => {
            let mut provider = gemini::GeminiProvider::new(api_key).with_timeout(timeout_secs);
            if let Some(url) = &cfg.api_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = &cfg.text_model {
                provider = provider.with_text_model(model);
            }
            if let Some(model) = &cfg.embedding_model {
                provider = provider.with_embedding_model(model);
            }
            if let Some(model) = &cfg.speech_model {
                provider = provider.with_speech_model(model);
            }
            Ok(Arc::new(provider))
        }
        "remote" => {
            let api_url = cfg
                .api_url
                .clone()
                .context("Remote adapter selected but llm.api_url is not set")?;
            let model = cfg.text_model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let mut provider = remote::RemoteLlmProvider::new(api_url, api_key, model)
                .with_defaults(timeout_secs, 500, 0.7);
            if let Some(model) = &cfg.embedding_model {
                provider = provider.with_embedding_model(model);
            }
            if let Some(model) = &cfg.speech_model {
                provider = provider.with_speech_model(model);
            }
            Ok(Arc::new(provider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}
