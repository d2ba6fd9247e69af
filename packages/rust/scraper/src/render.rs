//! JavaScript-rendering scrape through Firecrawl.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use leadscout_shared::{LeadScoutError, Result};

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("LeadScout/", env!("CARGO_PKG_VERSION"));

/// Output of a rendered fetch. Either part may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedPage {
    pub html: Option<String>,
    pub markdown: Option<String>,
}

/// A scrape that executes the page's JavaScript before reading it.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage>;
}

// ---------------------------------------------------------------------------
// Firecrawl
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    html: Option<String>,
    markdown: Option<String>,
}

/// Client for Firecrawl's `/scrape` endpoint.
pub struct FirecrawlClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FirecrawlClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PageRenderer for FirecrawlClient {
    #[instrument(skip_all, fields(url = %url))]
    async fn render(&self, url: &str) -> Result<RenderedPage> {
        let endpoint = format!("{}/scrape", self.base_url);
        let body = json!({
            "url": url,
            "formats": ["html", "markdown"],
            "onlyMainContent": false,
        });

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("firecrawl {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LeadScoutError::Auth(format!("firecrawl rejected the API key ({status})")));
        }
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("firecrawl {url}: HTTP {status}")));
        }

        let parsed: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("firecrawl {url}: {e}")))?;

        if !parsed.success {
            let reason = parsed.error.unwrap_or_else(|| "unknown error".into());
            return Err(LeadScoutError::Network(format!("firecrawl {url}: {reason}")));
        }

        let data = parsed
            .data
            .ok_or_else(|| LeadScoutError::malformed(format!("firecrawl {url}: missing data")))?;

        debug!(
            html_chars = data.html.as_deref().map_or(0, str::len),
            markdown_chars = data.markdown.as_deref().map_or(0, str::len),
            "rendered page"
        );

        Ok(RenderedPage {
            html: data.html.filter(|h| !h.trim().is_empty()),
            markdown: data.markdown.filter(|m| !m.trim().is_empty()),
        })
    }
}
