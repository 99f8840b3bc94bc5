use anyhow::{Context, Result};
use feed_rs::parser;
use tracing::{info, warn};

use crate::articles::CandidateItem;
use crate::google_news::GOOGLE_NEWS_BASE_URL;
use crate::retry::ResilientInvoker;
use crate::scraping::PageFetcher;

/// Produces candidate articles (text attached when extraction worked) for a topic.
#[async_trait::async_trait]
pub trait CandidateSource: Send + Sync {
    async fn gather(&self, topic: &str) -> Result<Vec<CandidateItem>>;
}

/// Google News search parameters
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// e.g. "3d"
    pub recency_window: String,
    pub language: String,
    pub country: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            recency_window: "3d".to_string(),
            language: "en".to_string(),
            country: "US".to_string(),
        }
    }
}

impl DiscoverySettings {
    pub fn from_config(cfg: &common::SelectionConfig) -> Self {
        let default = Self::default();
        Self {
            recency_window: cfg.recency_window.clone().unwrap_or(default.recency_window),
            language: cfg.language.clone().unwrap_or(default.language),
            country: cfg.country.clone().unwrap_or(default.country),
        }
    }
}

/// Discovers articles through the Google News RSS search feed, then decodes
/// each link to its publisher and extracts the page text with the batch's
/// `PageFetcher`. A link that cannot be decoded keeps no text.
pub struct GoogleNewsSource {
    fetcher: PageFetcher,
    invoker: ResilientInvoker,
    settings: DiscoverySettings,
    base_url: String,
}

impl GoogleNewsSource {
    pub fn new(fetcher: PageFetcher, invoker: ResilientInvoker, settings: DiscoverySettings) -> Self {
        Self {
            fetcher,
            invoker,
            settings,
            base_url: GOOGLE_NEWS_BASE_URL.to_string(),
        }
    }

    /// Search feed and link decoding both go to `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self.fetcher = self.fetcher.with_news_base_url(self.base_url.clone());
        self
    }

    pub fn search_url(&self, topic: &str) -> Result<url::Url> {
        let query = format!("{} when:{}", topic, self.settings.recency_window);
        let hl = format!("{}-{}", self.settings.language, self.settings.country);
        let ceid = format!("{}:{}", self.settings.country, self.settings.language);
        url::Url::parse_with_params(
            &format!("{}/rss/search", self.base_url),
            &[
                ("q", query.as_str()),
                ("hl", hl.as_str()),
                ("gl", self.settings.country.as_str()),
                ("ceid", ceid.as_str()),
            ],
        )
        .context("failed to build Google News search URL")
    }

    /// Candidates for `topic` without text.
    pub async fn discover(&self, topic: &str) -> Result<Vec<CandidateItem>> {
        let url = self.search_url(topic)?;
        let client = self.fetcher.client();

        let bytes = self
            .invoker
            .invoke("feed fetch", || {
                let url = url.clone();
                async move {
                    let response = client.get(url).send().await.context("network error during fetch")?;
                    let status = response.status();
                    if !status.is_success() {
                        anyhow::bail!("feed fetch failed with status: {}", status);
                    }
                    response.bytes().await.context("failed to read response body")
                }
            })
            .await?;

        parse_feed(&bytes, topic)
    }
}

#[async_trait::async_trait]
impl CandidateSource for GoogleNewsSource {
    async fn gather(&self, topic: &str) -> Result<Vec<CandidateItem>> {
        let mut candidates = self.discover(topic).await?;
        info!("ingestion: discovered {} candidates for '{}'", candidates.len(), topic);

        for candidate in candidates.iter_mut() {
            match self.fetcher.resolve_redirect(&candidate.url).await {
                Ok(resolved) => candidate.url = resolved,
                Err(e) => {
                    warn!("ingestion: leaving {} without text: {:#}", candidate.url, e);
                    continue;
                }
            }

            let Some(page) = self.fetcher.extract_text(&candidate.url).await else {
                continue;
            };
            if self.fetcher.is_google_news(&page.url) {
                warn!("ingestion: {} still lands on Google News, ignoring its text", candidate.url);
                continue;
            }
            candidate.url = page.url;
            candidate.text = Some(page.text);
        }

        let with_text = candidates.iter().filter(|c| c.text.is_some()).count();
        info!("ingestion: extracted text for {}/{} candidates", with_text, candidates.len());
        Ok(candidates)
    }
}

/// Parse an RSS/Atom document into text-less candidates.
pub fn parse_feed(bytes: &[u8], topic: &str) -> Result<Vec<CandidateItem>> {
    let feed = parser::parse(bytes).context("failed to parse feed")?;

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone())?;
            let raw_title = entry.title.map(|t| t.content).unwrap_or_default();
            let (title, publisher) = split_publisher(&raw_title);
            Some(CandidateItem {
                title,
                url,
                publisher,
                published_date: entry.published.map(|d| d.to_rfc2822()).unwrap_or_default(),
                text: None,
                topic: topic.to_string(),
            })
        })
        .collect();

    Ok(items)
}

/// Google News titles read "Headline - Publisher".
fn split_publisher(raw_title: &str) -> (String, String) {
    match raw_title.rsplit_once(" - ") {
        Some((title, publisher)) if !title.trim().is_empty() => {
            (title.trim().to_string(), publisher.trim().to_string())
        }
        _ => (raw_title.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>"technology when:3d" - Google News</title>
    <link>https://news.google.com</link>
    <description>Google News</description>
    <item>
      <title>Chipmaker unveils new accelerator - The Verge</title>
      <link>https://news.google.com/rss/articles/abc</link>
      <pubDate>Mon, 13 Oct 2025 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No publisher suffix here</title>
      <link>https://news.google.com/rss/articles/def</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed() {
        let items = parse_feed(FEED.as_bytes(), "technology").expect("parse");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Chipmaker unveils new accelerator");
        assert_eq!(items[0].publisher, "The Verge");
        assert_eq!(items[0].url, "https://news.google.com/rss/articles/abc");
        assert!(items[0].published_date.contains("13 Oct 2025"));
        assert_eq!(items[0].topic, "technology");
        assert!(items[0].text.is_none());

        assert_eq!(items[1].title, "No publisher suffix here");
        assert_eq!(items[1].publisher, "");
        assert_eq!(items[1].published_date, "");
    }

    #[test]
    fn test_split_publisher_uses_last_dash() {
        assert_eq!(
            split_publisher("Q3 - results beat estimates - Reuters"),
            ("Q3 - results beat estimates".to_string(), "Reuters".to_string())
        );
        assert_eq!(split_publisher(" - Reuters"), (" - Reuters".trim().to_string(), String::new()));
    }

    #[test]
    fn test_search_url() {
        let source = GoogleNewsSource::new(
            PageFetcher::new(5).unwrap(),
            ResilientInvoker::new(RetryPolicy::default()),
            DiscoverySettings::default(),
        );
        let url = source.search_url("climate tech").unwrap();
        assert_eq!(url.path(), "/rss/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_string(), "climate tech when:3d".to_string())));
        assert!(pairs.contains(&("hl".to_string(), "en-US".to_string())));
        assert!(pairs.contains(&("ceid".to_string(), "US:en".to_string())));
    }
}
