//! Website scraping: homepage, about page, and the rendered fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use leadscout_shared::{LeadScoutError, Result};

use crate::detect::detect_javascript_site;
use crate::extract::page_text;
use crate::render::{PageRenderer, RenderedPage, USER_AGENT};
use crate::urls::{clean_text, is_ssrf_target, normalize_url, validate_url};

/// Candidate about-page paths, probed in order.
const ABOUT_PATHS: &[&str] = &[
    "/about",
    "/about-us",
    "/company",
    "/our-story",
    "/team",
    "/who-we-are",
    "/about/company",
    "/company/about",
    "/about/team",
    "/team/about",
];

/// Below this many characters the plain fetch is treated as insufficient.
const LOW_CONTENT_CHARS: usize = 500;

const ABOUT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ScrapedSite
// ---------------------------------------------------------------------------

/// How the site content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeMethod {
    /// Plain HTTP fetch of homepage and about page.
    Regular,
    /// Detected as JS-heavy and rendered up front.
    Javascript,
    /// Plain fetch returned too little; rendered instead.
    JavascriptFallback,
    /// Plain fetch failed outright; rendered as a last resort.
    JavascriptEmergency,
    /// Assembled from user-supplied inputs rather than a scrape.
    Aggregated,
}

/// Text content of a company website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedSite {
    pub url: String,
    pub homepage: String,
    pub about_page: Option<String>,
    pub about_url: Option<String>,
    pub combined_text: String,
    pub method: ScrapeMethod,
    pub content_length: usize,
    pub is_javascript_site: bool,
}

impl ScrapedSite {
    /// Wrap already-collected text (pasted copy, aggregated inputs).
    pub fn from_text(url: &str, text: &str) -> Self {
        let combined_text = clean_text(text);
        Self {
            url: url.to_string(),
            homepage: combined_text.clone(),
            about_page: None,
            about_url: None,
            content_length: combined_text.chars().count(),
            combined_text,
            method: ScrapeMethod::Aggregated,
            is_javascript_site: false,
        }
    }

    fn rendered(url: &str, text: String, method: ScrapeMethod) -> Self {
        let combined_text = clean_text(&text);
        Self {
            url: url.to_string(),
            homepage: text,
            about_page: None,
            about_url: None,
            content_length: combined_text.chars().count(),
            combined_text,
            method,
            is_javascript_site: true,
        }
    }
}

/// Fetches and extracts the text of a company website.
#[async_trait]
pub trait SiteScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedSite>;
}

// ---------------------------------------------------------------------------
// WebsiteScraper
// ---------------------------------------------------------------------------

/// Plain-HTTP scraper with an optional rendering fallback.
pub struct WebsiteScraper {
    client: Client,
    renderer: Option<Arc<dyn PageRenderer>>,
    /// Allow localhost/private IPs (for tests against mock servers).
    allow_localhost: bool,
}

impl WebsiteScraper {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            renderer: None,
            allow_localhost: false,
        })
    }

    /// Use `renderer` for JS-heavy or near-empty sites.
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Fetch one page and return its raw HTML.
    async fn fetch_html(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: failed to read body: {e}")))
    }

    /// First about-page candidate answering HEAD with 200.
    async fn find_about_url(&self, base: &Url) -> Option<Url> {
        for candidate in ABOUT_PATHS {
            let Ok(url) = base.join(candidate) else {
                continue;
            };
            let probe = self
                .client
                .head(url.as_str())
                .timeout(ABOUT_PROBE_TIMEOUT)
                .send()
                .await;
            match probe {
                Ok(resp) if resp.status() == StatusCode::OK => return Some(url),
                Ok(_) => {}
                Err(e) => debug!(%url, error = %e, "about probe failed"),
            }
        }
        None
    }

    /// Rendered text from the configured renderer, if any and long enough.
    async fn try_render(&self, url: &str, min_chars: usize) -> Option<String> {
        let renderer = self.renderer.as_ref()?;
        match renderer.render(url).await {
            Ok(page) => rendered_text(page).filter(|t| t.chars().count() > min_chars),
            Err(e) => {
                warn!(url, error = %e, "rendered fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl SiteScraper for WebsiteScraper {
    #[instrument(skip_all, fields(url = %input))]
    async fn scrape(&self, input: &str) -> Result<ScrapedSite> {
        let normalized = normalize_url(input);
        let url = validate_url(&normalized)?;

        if !self.allow_localhost && is_ssrf_target(&url) {
            warn!(%url, "SSRF protection: blocked");
            return Err(LeadScoutError::user_input(format!(
                "refusing to fetch private address {url}"
            )));
        }

        let homepage_html = match self.fetch_html(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(%url, error = %e, "homepage fetch failed");
                if let Some(text) = self.try_render(url.as_str(), 0).await {
                    info!(chars = text.len(), "recovered with rendered fetch");
                    return Ok(ScrapedSite::rendered(
                        url.as_str(),
                        text,
                        ScrapeMethod::JavascriptEmergency,
                    ));
                }
                return Err(e);
            }
        };

        let host = url.host_str().unwrap_or_default();
        let (homepage, js_indicator) = {
            let doc = Html::parse_document(&homepage_html);
            let indicator = detect_javascript_site(&doc, &homepage_html, host);
            (page_text(&doc), indicator)
        };
        let is_javascript_site = js_indicator.is_some();

        if let Some(indicator) = &js_indicator {
            info!(reason = %indicator, "JavaScript-heavy site detected");
            if let Some(text) = self.try_render(url.as_str(), LOW_CONTENT_CHARS).await {
                return Ok(ScrapedSite::rendered(url.as_str(), text, ScrapeMethod::Javascript));
            }
        }

        let about_url = self.find_about_url(&url).await;
        let about_page = match &about_url {
            Some(about) => {
                info!(url = %about, "found about page");
                match self.fetch_html(about).await {
                    Ok(html) => Some(html_text(&html)),
                    Err(e) => {
                        warn!(url = %about, error = %e, "about page fetch failed, skipping");
                        None
                    }
                }
            }
            None => None,
        };

        let combined = match &about_page {
            Some(about) => format!("{homepage} {about}"),
            None => homepage.clone(),
        };
        let combined_text = clean_text(&combined);

        if combined_text.chars().count() < LOW_CONTENT_CHARS {
            warn!(chars = combined_text.len(), "low content, trying rendered fetch");
            if let Some(text) = self.try_render(url.as_str(), LOW_CONTENT_CHARS).await {
                return Ok(ScrapedSite::rendered(
                    url.as_str(),
                    text,
                    ScrapeMethod::JavascriptFallback,
                ));
            }
        }

        info!(chars = combined_text.len(), about = about_page.is_some(), "scraped website");

        Ok(ScrapedSite {
            url: url.to_string(),
            homepage,
            about_page,
            about_url: about_url.map(|u| u.to_string()),
            content_length: combined_text.chars().count(),
            combined_text,
            method: ScrapeMethod::Regular,
            is_javascript_site,
        })
    }
}

/// Prefer markdown; fall back to extracting text from rendered HTML.
fn rendered_text(page: RenderedPage) -> Option<String> {
    if let Some(markdown) = page.markdown {
        return Some(markdown);
    }
    page.html
        .map(|html| html_text(&html))
        .filter(|t| !t.is_empty())
}

fn html_text(html: &str) -> String {
    page_text(&Html::parse_document(html))
}
