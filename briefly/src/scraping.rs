use anyhow::{Context, Result};
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::google_news::GoogleNewsDecoder;

/// A fetched page: the URL it was finally served from and its main text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub url: String,
    pub text: String,
}

/// HTTP page fetcher owned by one discovery batch.
///
/// Build it before a batch of topics and drop it afterwards; discovery borrows it
/// instead of reaching for a process-wide client.
pub struct PageFetcher {
    client: Client,
    decoder: GoogleNewsDecoder,
}

impl PageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; Briefly/0.1.0)")
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            decoder: GoogleNewsDecoder::default(),
        })
    }

    /// Point link decoding at another Google News host.
    pub fn with_news_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.decoder = GoogleNewsDecoder::new(base_url);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_google_news(&self, url: &str) -> bool {
        self.decoder.is_google_news(url)
    }

    /// Publisher URL behind a feed link. Google News links are decoded; any other
    /// link is returned as is, HTTP redirects being followed by the page fetch.
    pub async fn resolve_redirect(&self, url: &str) -> Result<String> {
        let resolved = self
            .decoder
            .decode(&self.client, url)
            .await
            .with_context(|| format!("failed to resolve {}", url))?;
        if resolved != url {
            debug!("scraping: resolved {} -> {}", url, resolved);
        }
        Ok(resolved)
    }

    /// Fetch a page once and extract its main text. `None` when the page cannot be
    /// fetched or no text survives extraction.
    pub async fn extract_text(&self, url: &str) -> Option<ExtractedPage> {
        match self.scrape(url).await {
            Ok(page) if !page.text.trim().is_empty() => Some(page),
            Ok(_) => {
                warn!("scraping: no text extracted from {}", url);
                None
            }
            Err(e) => {
                warn!("scraping: failed to extract {}: {:#}", url, e);
                None
            }
        }
    }

    async fn scrape(&self, url: &str) -> Result<ExtractedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to fetch article page")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("article fetch failed with status: {}", status);
        }

        let final_url = response.url().clone();
        let bytes = response.bytes().await.context("failed to read response body")?;
        let text = extract_main_text(&bytes, &final_url)?;
        Ok(ExtractedPage {
            url: final_url.to_string(),
            text,
        })
    }
}

/// Readability extraction followed by an HTML-to-text pass.
pub fn extract_main_text(html: &[u8], url: &url::Url) -> Result<String> {
    let mut reader = Cursor::new(html);
    let product = readability::extractor::extract(&mut reader, url)
        .map_err(|e| anyhow::anyhow!("readability failed for {}: {}", url, e))?;

    match html2text::from_read(product.content.as_bytes(), 80) {
        Ok(text) => {
            info!("scraping: extracted {} chars from {}", text.len(), url);
            Ok(text.trim().to_string())
        }
        Err(e) => {
            warn!("scraping: failed to convert extracted HTML to text: {}", e);
            Ok(product.text.trim().to_string())
        }
    }
}
