use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::articles::Article;
use crate::audio;
use crate::error::BroadcastError;
use crate::llm::{self, LlmProvider, LlmRequest, SpeakerVoice};
use crate::retry::{ResilientInvoker, RetryPolicy};
use crate::segment::{ScriptSegmenter, DEFAULT_MINUTES_PER_PART};
use crate::storage;

/// Longest broadcast a single run may be asked for.
pub const MAX_DURATION_MINUTES: u32 = 60;

/// Requested duration in minutes; 0 counts as 1, anything above the cap is refused.
pub fn validate_duration(requested: u32) -> Result<u32, BroadcastError> {
    if requested > MAX_DURATION_MINUTES {
        return Err(BroadcastError::DurationOutOfRange {
            requested,
            max: MAX_DURATION_MINUTES,
        });
    }
    Ok(requested.max(1))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastSettings {
    pub words_per_minute: u32,
    pub max_output_tokens: usize,
    pub minutes_per_part: u32,
    /// Speech calls in flight at once; 1 keeps them sequential
    pub speech_concurrency: usize,
    pub speakers: Vec<SpeakerVoice>,
    pub non_terminal_speaker: String,
    pub output_path: PathBuf,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self::from_config(&common::Config::default())
    }
}

impl BroadcastSettings {
    pub fn from_config(config: &common::Config) -> Self {
        let cfg = &config.broadcast;
        Self {
            words_per_minute: cfg.words_per_minute.unwrap_or(145),
            max_output_tokens: cfg.max_output_tokens.unwrap_or(10_000),
            minutes_per_part: cfg.minutes_per_part.unwrap_or(DEFAULT_MINUTES_PER_PART).max(1),
            speech_concurrency: cfg.speech_concurrency.unwrap_or(1).max(1),
            speakers: config.speakers().iter().map(SpeakerVoice::from).collect(),
            non_terminal_speaker: config.non_terminal_speaker(),
            output_path: PathBuf::from(cfg.output_path.as_deref().unwrap_or("Broadcast.wav")),
        }
    }

    /// "Sarah and John"
    fn anchors(&self) -> String {
        self.speakers
            .iter()
            .map(|s| s.speaker.as_str())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

/// Script, its parts and the concatenated PCM of every part in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastAudio {
    pub script: String,
    pub parts: Vec<String>,
    pub pcm: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastOutcome {
    Produced(BroadcastAudio),
    /// None of the requested URLs is stored; nothing was generated.
    NoMatchingArticles,
}

pub struct BroadcastPipeline {
    provider: Arc<dyn LlmProvider>,
    invoker: ResilientInvoker,
    settings: BroadcastSettings,
}

impl BroadcastPipeline {
    pub fn new(provider: Arc<dyn LlmProvider>, invoker: ResilientInvoker, settings: BroadcastSettings) -> Self {
        Self {
            provider,
            invoker,
            settings,
        }
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.settings
    }

    /// Load the stored articles for `urls` and turn them into broadcast audio.
    pub async fn run(&self, pool: &SqlitePool, urls: &[String], duration_minutes: u32) -> Result<BroadcastOutcome> {
        validate_duration(duration_minutes)?;
        let total = storage::load_articles(pool).await?.len();
        let articles = storage::load_articles_by_urls(pool, urls).await?;
        info!("broadcast: found {} matching articles out of {} stored", articles.len(), total);

        if articles.is_empty() {
            warn!("broadcast: no stored articles match the {} requested URLs", urls.len());
            for url in urls {
                warn!("broadcast: requested {}", url);
            }
            return Ok(BroadcastOutcome::NoMatchingArticles);
        }

        let audio = self.produce(&articles, duration_minutes).await?;
        Ok(BroadcastOutcome::Produced(audio))
    }

    /// Script generation, segmentation and speech synthesis. Any failure aborts.
    pub async fn produce(&self, articles: &[Article], duration_minutes: u32) -> Result<BroadcastAudio> {
        let duration_minutes = validate_duration(duration_minutes)?;
        let words = self.settings.words_per_minute.saturating_mul(duration_minutes);
        let prompt = build_script_prompt(
            articles,
            words,
            &self.settings.anchors(),
            &self.settings.non_terminal_speaker,
        );

        let provider = &self.provider;
        let max_tokens = self.settings.max_output_tokens;
        info!("broadcast: generating a ~{} word script from {} articles", words, articles.len());
        let response = self
            .invoker
            .invoke("script generation", || {
                provider.generate(LlmRequest::new(prompt.clone()).with_max_tokens(max_tokens))
            })
            .await
            .context("failed to generate script")?;

        let script = response.content;
        if script.trim().is_empty() {
            return Err(BroadcastError::EmptyScript.into());
        }

        let parts = ScriptSegmenter::new(self.settings.non_terminal_speaker.clone())
            .with_minutes_per_part(self.settings.minutes_per_part)
            .segment(&script, duration_minutes);
        if parts.is_empty() {
            return Err(BroadcastError::NoScriptParts.into());
        }
        info!("broadcast: script split into {} parts for {} minutes", parts.len(), duration_minutes);

        let buffers = self.synthesize_parts(&parts).await?;
        let total = buffers.len();
        if let Some(index) = buffers.iter().position(|b| b.is_empty()) {
            return Err(BroadcastError::EmptyAudio { part: index + 1, total }.into());
        }

        let pcm = buffers.concat();
        info!("broadcast: {} bytes of audio from {} parts", pcm.len(), total);
        Ok(BroadcastAudio { script, parts, pcm })
    }

    /// One speech call per part, at most `speech_concurrency` in flight, results in
    /// part order.
    async fn synthesize_parts(&self, parts: &[String]) -> Result<Vec<Vec<u8>>> {
        let speakers: Arc<[SpeakerVoice]> = self.settings.speakers.clone().into();
        let anchors = self.settings.anchors();
        let total = parts.len();

        let calls: Vec<_> = parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                let provider = Arc::clone(&self.provider);
                let invoker = self.invoker.clone();
                let speakers = Arc::clone(&speakers);
                let prompt = speech_prompt(&anchors, part);
                let label = format!("speech part {}/{}", i + 1, total);
                async move {
                    invoker
                        .invoke(&label, || provider.synthesize_speech(&prompt, &speakers[..]))
                        .await
                        .with_context(|| format!("failed to synthesize {}", label))
                }
            })
            .collect();

        stream::iter(calls)
            .buffered(self.settings.speech_concurrency)
            .try_collect()
            .await
    }
}

pub fn build_script_prompt(articles: &[Article], words: u32, anchors: &str, opening_speaker: &str) -> String {
    let mut prompt = format!(
        "Generate an around-{} word script between anchors {} about various topics. \
Base the script on the following articles, quickly going through each news and transitioning smoothly. \
Note that the content was retrieved through web scraping, so extraneous metadata may also be there. \
ONLY output the verbal script, nothing else. Don't use special characters like **. \
First line starts with {}. Make sure to cite the source for each article. The articles are below:",
        words, anchors, opening_speaker
    );
    for article in articles {
        prompt.push_str("\nHeadline: ");
        prompt.push_str(&article.title);
        prompt.push_str("\nContent: ");
        prompt.push_str(&article.text);
    }
    prompt
}

pub fn speech_prompt(anchors: &str, part: &str) -> String {
    format!("This is a news broadcast between {}:\n{}", anchors, part)
}

/// Build the configured provider, run the pipeline and write the WAV file.
pub async fn generate_broadcast(
    pool: &SqlitePool,
    config: &common::Config,
    api_key: &str,
    urls: &[String],
    duration_minutes: u32,
) -> Result<BroadcastOutcome> {
    let provider = llm::create_provider(&config.llm, api_key)?;
    let invoker = ResilientInvoker::new(RetryPolicy::from_config(&config.retry));
    let pipeline = BroadcastPipeline::new(provider, invoker, BroadcastSettings::from_config(config));

    info!("broadcast: starting with {} URLs, {} minutes", urls.len(), duration_minutes);
    let outcome = pipeline.run(pool, urls, duration_minutes).await?;
    if let BroadcastOutcome::Produced(audio) = &outcome {
        write_output(&pipeline.settings().output_path, &audio.pcm)?;
    }
    Ok(outcome)
}

fn write_output(path: &Path, pcm: &[u8]) -> Result<()> {
    audio::write_wav(path, pcm).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use crate::retry::Sleeper;
    use std::sync::Mutex;
    use std::time::Duration;

    const SCRIPT: &str = "Sarah: Good evening.\nJohn: Top story first.\nSarah: Markets rallied.\nJohn: Tech led gains.\nSarah: In science news.\nJohn: A comet flyby.\nSarah: And in health.\nJohn: New guidance.\nSarah: Sports now.\nJohn: A late winner.\nSarah: That's all.\nJohn: Goodnight.";

    struct NoSleep;

    #[async_trait::async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    /// Answers with a fixed script; speech returns the part text itself as "audio".
    struct StubProvider {
        script: String,
        speech_prompts: Mutex<Vec<String>>,
        generate_calls: Mutex<usize>,
        stagger: bool,
    }

    impl StubProvider {
        fn new(script: &str) -> Self {
            Self {
                script: script.to_string(),
                speech_prompts: Mutex::new(Vec::new()),
                generate_calls: Mutex::new(0),
                stagger: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
            *self.generate_calls.lock().unwrap() += 1;
            assert_eq!(request.max_tokens, Some(10_000));
            Ok(LlmResponse {
                content: self.script.clone(),
                usage: UsageMetadata::default(),
                model: "stub".to_string(),
            })
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        async fn synthesize_speech(&self, prompt: &str, speakers: &[SpeakerVoice]) -> Result<Vec<u8>> {
            assert_eq!(speakers.len(), 2);
            self.speech_prompts.lock().unwrap().push(prompt.to_string());
            let part = prompt
                .split_once(":\n")
                .map(|(_, p)| p.to_string())
                .unwrap_or_default();
            if self.stagger {
                // earlier parts finish later
                let wait = 40u64.saturating_sub(part.len() as u64 % 40);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
            Ok(part.into_bytes())
        }
    }

    fn pipeline(provider: Arc<StubProvider>, concurrency: usize) -> BroadcastPipeline {
        let settings = BroadcastSettings {
            speech_concurrency: concurrency,
            ..Default::default()
        };
        BroadcastPipeline::new(
            provider,
            ResilientInvoker::new(RetryPolicy::default()).with_sleeper(Arc::new(NoSleep)),
            settings,
        )
    }

    fn article(url: &str) -> Article {
        Article {
            title: format!("Headline {}", url),
            url: url.to_string(),
            publisher: "Wire".to_string(),
            published_date: String::new(),
            text: format!("Text of {}", url),
            topic: "science".to_string(),
        }
    }

    #[test]
    fn test_script_prompt() {
        let settings = BroadcastSettings::default();
        let prompt = build_script_prompt(&[article("a"), article("b")], 725, &settings.anchors(), "Sarah");
        assert!(prompt.starts_with("Generate an around-725 word script between anchors Sarah and John"));
        assert!(prompt.contains("First line starts with Sarah."));
        assert!(prompt.ends_with("\nHeadline: Headline a\nContent: Text of a\nHeadline: Headline b\nContent: Text of b"));
    }

    #[tokio::test]
    async fn test_no_matching_urls_produces_nothing() {
        let pool = storage::memory_pool().await;
        storage::replace_articles(&pool, &[article("https://a.example")]).await.unwrap();
        let provider = Arc::new(StubProvider::new(SCRIPT));

        let outcome = pipeline(provider.clone(), 1)
            .run(&pool, &["https://missing.example".to_string()], 5)
            .await
            .unwrap();

        assert_eq!(outcome, BroadcastOutcome::NoMatchingArticles);
        assert_eq!(*provider.generate_calls.lock().unwrap(), 0);
        assert!(provider.speech_prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_covers_every_part_in_order() {
        let pool = storage::memory_pool().await;
        storage::replace_articles(&pool, &[article("https://a.example"), article("https://b.example")])
            .await
            .unwrap();
        let provider = Arc::new(StubProvider::new(SCRIPT));

        let outcome = pipeline(provider.clone(), 1)
            .run(&pool, &["https://b.example".to_string()], 10)
            .await
            .unwrap();
        let BroadcastOutcome::Produced(audio) = outcome else {
            panic!("expected audio");
        };

        assert_eq!(audio.parts.len(), 2);
        assert_eq!(audio.parts.join("\n"), SCRIPT);
        assert_eq!(audio.pcm, audio.parts.concat().into_bytes());

        let prompts = provider.speech_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("This is a news broadcast between Sarah and John:\nSarah: Good evening."));
    }

    #[tokio::test]
    async fn test_concurrent_speech_keeps_part_order() {
        let script = (0..30)
            .map(|i| if i % 2 == 0 { format!("Sarah: line {}", i) } else { format!("John: line {}", i) })
            .collect::<Vec<_>>()
            .join("\n");
        let mut stub = StubProvider::new(&script);
        stub.stagger = true;
        let provider = Arc::new(stub);

        let audio = pipeline(provider, 4).produce(&[article("a")], 20).await.unwrap();

        assert_eq!(audio.parts.len(), 4);
        assert_eq!(audio.parts.join("\n"), script);
        assert_eq!(audio.pcm, audio.parts.concat().into_bytes());
    }

    #[test]
    fn test_validate_duration() {
        assert_eq!(validate_duration(0), Ok(1));
        assert_eq!(validate_duration(MAX_DURATION_MINUTES), Ok(MAX_DURATION_MINUTES));
        assert_eq!(
            validate_duration(30_000_000),
            Err(BroadcastError::DurationOutOfRange { requested: 30_000_000, max: MAX_DURATION_MINUTES })
        );
    }

    #[tokio::test]
    async fn test_oversized_duration_is_refused_before_generation() {
        let provider = Arc::new(StubProvider::new(SCRIPT));

        let err = pipeline(provider.clone(), 1)
            .produce(&[article("a")], 30_000_000)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BroadcastError>(),
            Some(BroadcastError::DurationOutOfRange { requested: 30_000_000, .. })
        ));
        assert_eq!(*provider.generate_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_script_is_fatal() {
        let provider = Arc::new(StubProvider::new("  \n"));

        let err = pipeline(provider.clone(), 1)
            .produce(&[article("a")], 5)
            .await
            .unwrap_err();

        assert_eq!(err.downcast_ref::<BroadcastError>(), Some(&BroadcastError::EmptyScript));
        assert!(provider.speech_prompts.lock().unwrap().is_empty());
    }
}
