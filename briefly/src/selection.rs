use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::articles::Article;
use crate::ingestion::{CandidateSource, DiscoverySettings, GoogleNewsSource};
use crate::llm::{self, LlmProvider, LlmRequest};
use crate::mmr;
use crate::retry::{ResilientInvoker, RetryPolicy};
use crate::scraping::PageFetcher;
use crate::storage;

const RERANK_INSTRUCTIONS: &str = "Given the following article/blog headlines, find the most interesting stories/news. \
Don't use ones that obviously aren't even close to news/blogs/stories. \
ONLY output the line numbers (starting from 1) of the best {count}. \
DON'T use special characters like * unless they are in the headline.";

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSettings {
    /// MMR shortlist size (k)
    pub shortlist_size: usize,
    pub lambda: f32,
    /// How many headlines the model is asked to keep
    pub final_count: usize,
    /// Topics embedded verbatim; anything else goes through the expanded query
    pub predefined_topics: Vec<String>,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            shortlist_size: 15,
            lambda: 0.3,
            final_count: 5,
            predefined_topics: common::Config::default().predefined_topics(),
        }
    }
}

impl SelectionSettings {
    pub fn from_config(config: &common::Config) -> Self {
        let default = Self::default();
        Self {
            shortlist_size: config.selection.shortlist_size.unwrap_or(default.shortlist_size),
            lambda: config.selection.lambda.unwrap_or(default.lambda).clamp(0.0, 1.0),
            final_count: config.selection.final_count.unwrap_or(default.final_count),
            predefined_topics: config.predefined_topics(),
        }
    }
}

/// Result of one topic. `Empty` is a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Selected(Vec<Article>),
    Empty,
}

/// Result of a multi-topic run.
#[derive(Debug, Default)]
pub struct SelectionReport {
    pub articles: Vec<Article>,
    pub empty_topics: Vec<String>,
    pub failed_topics: Vec<String>,
}

pub struct SelectionPipeline {
    provider: Arc<dyn LlmProvider>,
    invoker: ResilientInvoker,
    settings: SelectionSettings,
}

impl SelectionPipeline {
    pub fn new(provider: Arc<dyn LlmProvider>, invoker: ResilientInvoker, settings: SelectionSettings) -> Self {
        Self {
            provider,
            invoker,
            settings,
        }
    }

    /// String whose embedding stands for the topic during MMR.
    pub fn search_query(&self, topic: &str) -> String {
        let lowered = topic.to_lowercase();
        if self.settings.predefined_topics.iter().any(|t| t.to_lowercase() == lowered) {
            topic.to_string()
        } else {
            format!(
                "{t} news OR  {t} latest OR {t} update OR {t} breaking",
                t = topic
            )
        }
    }

    /// Gather, shortlist and rerank the articles for a single topic.
    pub async fn select_for_topic(&self, source: &dyn CandidateSource, topic: &str) -> Result<SelectionOutcome> {
        let candidates = source.gather(topic).await?;
        let discovered = candidates.len();
        let articles: Vec<Article> = candidates
            .into_iter()
            .filter_map(|c| c.into_article())
            .collect();

        if articles.len() < discovered {
            warn!(
                "selection: dropped {} of {} candidates for '{}' without text",
                discovered - articles.len(),
                discovered,
                topic
            );
        }

        if articles.is_empty() {
            info!("selection: no usable candidates for '{}'", topic);
            return Ok(SelectionOutcome::Empty);
        }

        let selected = self.rank(articles, topic).await?;
        if selected.is_empty() {
            info!("selection: rerank kept nothing for '{}'", topic);
            return Ok(SelectionOutcome::Empty);
        }

        info!("selection: {} articles selected for '{}'", selected.len(), topic);
        Ok(SelectionOutcome::Selected(selected))
    }

    /// Embed, shortlist with MMR, then let the model pick from the shortlist.
    pub async fn rank(&self, articles: Vec<Article>, topic: &str) -> Result<Vec<Article>> {
        let titles: Vec<String> = articles.iter().map(|a| a.title.clone()).collect();

        let provider = &self.provider;
        let title_embeddings = self
            .invoker
            .invoke("title embeddings", || provider.embed(&titles))
            .await
            .context("failed to embed titles")?;
        if title_embeddings.len() != articles.len() {
            anyhow::bail!(
                "embedding service returned {} vectors for {} titles",
                title_embeddings.len(),
                articles.len()
            );
        }
        info!("selection: embedded {} titles", titles.len());

        let query = vec![self.search_query(topic)];
        let query_embedding = self
            .invoker
            .invoke("query embedding", || provider.embed(&query))
            .await
            .context("failed to embed query")?
            .into_iter()
            .next()
            .context("embedding service returned no query vector")?;

        let order = mmr::select(
            &title_embeddings,
            &query_embedding,
            self.settings.shortlist_size,
            self.settings.lambda,
        );
        let mut slots: Vec<Option<Article>> = articles.into_iter().map(Some).collect();
        let shortlist: Vec<Article> = order.iter().filter_map(|&i| slots[i].take()).collect();
        info!("selection: MMR shortlisted {} articles", shortlist.len());

        let prompt = build_rerank_prompt(&shortlist, self.settings.final_count);
        let response = self
            .invoker
            .invoke("headline rerank", || provider.generate(LlmRequest::new(prompt.clone())))
            .await
            .context("failed to rerank headlines")?;

        let picks = parse_line_numbers(&response.content, shortlist.len());
        Ok(picks.into_iter().map(|i| shortlist[i].clone()).collect())
    }

    /// Run every topic in order. A failing topic is logged and skipped.
    pub async fn run_topics(&self, source: &dyn CandidateSource, topics: &[String]) -> SelectionReport {
        let mut report = SelectionReport::default();

        for topic in topics {
            info!("selection: processing topic '{}'", topic);
            match self.select_for_topic(source, topic).await {
                Ok(SelectionOutcome::Selected(articles)) => {
                    info!("selection: found {} articles for '{}'", articles.len(), topic);
                    report.articles.extend(articles);
                }
                Ok(SelectionOutcome::Empty) => {
                    info!("selection: no articles found for '{}'", topic);
                    report.empty_topics.push(topic.clone());
                }
                Err(e) => {
                    error!("selection: topic '{}' failed: {:#}", topic, e);
                    report.failed_topics.push(topic.clone());
                }
            }
        }

        report
    }
}

/// Numbered headline list preceded by the selection instructions.
pub fn build_rerank_prompt(shortlist: &[Article], final_count: usize) -> String {
    let mut prompt = RERANK_INSTRUCTIONS.replace("{count}", &final_count.to_string());
    prompt.push_str("\n\n");
    for (i, article) in shortlist.iter().enumerate() {
        prompt.push_str(&format!("\n{}. Headline: \"{}\"\n", i + 1, article.title));
    }
    prompt
}

/// Turn the model's 1-based line numbers into shortlist indices, in answer order.
///
/// Tokens are split on newlines and commas. Blank tokens are skipped; tokens
/// that are not numbers, are zero, exceed `shortlist_len` or repeat an earlier
/// pick are dropped with a warning.
pub fn parse_line_numbers(response: &str, shortlist_len: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut picks = Vec::new();

    for raw in response.split(|c: char| c == '\n' || c == ',') {
        let token = raw.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation());
        if token.is_empty() {
            continue;
        }
        let line: usize = match token.parse() {
            Ok(n) => n,
            Err(_) => {
                warn!("selection: ignoring non-numeric rerank entry {:?}", raw.trim());
                continue;
            }
        };
        if line == 0 || line > shortlist_len {
            warn!("selection: ignoring out-of-range line {} (shortlist has {})", line, shortlist_len);
            continue;
        }
        if !seen.insert(line) {
            warn!("selection: ignoring repeated line {}", line);
            continue;
        }
        picks.push(line - 1);
    }

    picks
}

/// Discover, select and persist articles for `topics` with a fresh page fetcher.
pub async fn find_articles(
    pool: &SqlitePool,
    config: &common::Config,
    api_key: &str,
    topics: &[String],
) -> Result<SelectionReport> {
    let provider = llm::create_provider(&config.llm, api_key)?;
    let invoker = ResilientInvoker::new(RetryPolicy::from_config(&config.retry));
    let fetcher = PageFetcher::new(config.selection.fetch_timeout_seconds.unwrap_or(10))?;
    let source = GoogleNewsSource::new(
        fetcher,
        invoker.clone(),
        DiscoverySettings::from_config(&config.selection),
    );
    let pipeline = SelectionPipeline::new(provider, invoker, SelectionSettings::from_config(config));

    info!("selection: using topics {:?}", topics);
    let report = pipeline.run_topics(&source, topics).await;
    drop(source);

    storage::replace_articles(pool, &report.articles).await?;
    if report.articles.is_empty() {
        info!("selection: no articles found for any topic");
    }
    Ok(report)
}
