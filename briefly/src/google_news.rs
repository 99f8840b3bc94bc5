//! Decoding of Google News article links into publisher URLs.
//!
//! Feed links look like `https://news.google.com/rss/articles/<id>?oc=5`. They never
//! answer with an HTTP redirect; Google serves an interstitial page instead. Older ids
//! carry the publisher URL inside their base64 payload. Newer ones (payload starting
//! with `AU_yqL`) must be exchanged through the `batchexecute` endpoint using the
//! signature and timestamp found on the article page.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

pub const GOOGLE_NEWS_BASE_URL: &str = "https://news.google.com";

const BATCH_EXECUTE_PATH: &str = "/_/DotsSplashUi/data/batchexecute";
const PAYLOAD_PREFIX: &[u8] = &[0x08, 0x13, 0x22];
const PAYLOAD_SUFFIX: &[u8] = &[0xd2, 0x01, 0x00];

/// Signature and timestamp the batchexecute call must echo back.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingParams {
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct GoogleNewsDecoder {
    base_url: String,
}

impl Default for GoogleNewsDecoder {
    fn default() -> Self {
        Self::new(GOOGLE_NEWS_BASE_URL)
    }
}

impl GoogleNewsDecoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        Url::parse(&self.base_url)
            .map(|base| base.origin() == url.origin())
            .unwrap_or(false)
    }

    /// True when `url` is served by Google News rather than a publisher.
    pub fn is_google_news(&self, url: &str) -> bool {
        Url::parse(url).map(|u| self.is_same_origin(&u)).unwrap_or(false)
    }

    /// The `<id>` of `/rss/articles/<id>`, `/articles/<id>` or `/read/<id>` links.
    pub fn article_id(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if !self.is_same_origin(&parsed) {
            return None;
        }
        let segments: Vec<&str> = parsed.path_segments()?.collect();
        let pos = segments.iter().position(|s| *s == "articles" || *s == "read")?;
        segments
            .get(pos + 1)
            .filter(|id| !id.is_empty())
            .map(|id| id.to_string())
    }

    /// Publisher URL for a Google News link. Links from elsewhere come back unchanged.
    pub async fn decode(&self, client: &Client, url: &str) -> Result<String> {
        let Some(id) = self.article_id(url) else {
            return Ok(url.to_string());
        };

        if let Some(decoded) = decode_payload(&id) {
            debug!("google_news: decoded {} from its id", decoded);
            return Ok(decoded);
        }

        let params = self.fetch_params(client, &id).await?;
        let decoded = self.batch_execute(client, &id, &params).await?;
        debug!("google_news: decoded {} through batchexecute", decoded);
        Ok(decoded)
    }

    async fn fetch_params(&self, client: &Client, id: &str) -> Result<DecodingParams> {
        let page_url = format!("{}/articles/{}", self.base_url(), id);
        let response = client
            .get(&page_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", page_url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Google News article page failed with status: {}", status);
        }
        let html = response.text().await.context("failed to read article page")?;
        parse_decoding_params(&html)
    }

    async fn batch_execute(&self, client: &Client, id: &str, params: &DecodingParams) -> Result<String> {
        let endpoint = format!("{}{}", self.base_url(), BATCH_EXECUTE_PATH);
        let response = client
            .post(&endpoint)
            .form(&[("f.req", batch_request(id, params))])
            .send()
            .await
            .context("batchexecute request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("batchexecute failed with status: {}", status);
        }
        let body = response.text().await.context("failed to read batchexecute response")?;
        parse_batch_response(&body)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Publisher URL embedded in an old-style id, if any.
pub fn decode_payload(id: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(id.trim_end_matches('=')).ok()?;
    let body = bytes.strip_prefix(PAYLOAD_PREFIX)?;
    let body = body.strip_suffix(PAYLOAD_SUFFIX).unwrap_or(body);

    // varint length, one or two bytes
    let (&first, rest) = body.split_first()?;
    let (len, rest) = if first >= 0x80 {
        let (&second, rest) = rest.split_first()?;
        (((first & 0x7f) as usize) | ((second as usize) << 7), rest)
    } else {
        (first as usize, rest)
    };

    let url = std::str::from_utf8(rest.get(..len)?).ok()?;
    url.starts_with("http").then(|| url.to_string())
}

pub fn parse_decoding_params(html: &str) -> Result<DecodingParams> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("c-wiz > div[jscontroller]")
        .map_err(|e| anyhow::anyhow!("invalid selector: {:?}", e))?;
    let element = document
        .select(&selector)
        .next()
        .context("article page has no decoding parameters")?;

    let signature = element
        .value()
        .attr("data-n-a-sg")
        .context("article page has no signature")?
        .to_string();
    let timestamp = element
        .value()
        .attr("data-n-a-ts")
        .context("article page has no timestamp")?
        .parse::<i64>()
        .context("article page timestamp is not a number")?;
    Ok(DecodingParams { signature, timestamp })
}

fn batch_request(id: &str, params: &DecodingParams) -> String {
    let inner = json!([
        "garturlreq",
        [
            ["X", "X", ["X", "X"], null, null, 1, 1, "US:en", null, 1, null, null, null, null, null, 0, 1],
            "X", "X", 1, [1, 1, 1], 1, 1, null, 0, 0, null, 0
        ],
        id,
        params.timestamp,
        params.signature
    ]);
    json!([[["Fbv4je", inner.to_string(), null, "generic"]]]).to_string()
}

/// `)]}'` guard, blank line, then a JSON array whose `wrb.fr` entry holds
/// `["garturlres", "<url>", ...]` as an embedded JSON string.
pub fn parse_batch_response(body: &str) -> Result<String> {
    let chunk = body
        .split("\n\n")
        .nth(1)
        .context("unexpected batchexecute response format")?;
    let envelopes: Vec<Value> = serde_json::from_str(chunk.trim()).context("batchexecute response is not JSON")?;

    let payload = envelopes
        .iter()
        .find(|e| e[0] == "wrb.fr")
        .and_then(|e| e[2].as_str())
        .context("batchexecute response has no article payload")?;
    let decoded: Value = serde_json::from_str(payload).context("article payload is not JSON")?;
    decoded[1]
        .as_str()
        .filter(|u| u.starts_with("http"))
        .map(String::from)
        .context("article payload has no URL")
}
