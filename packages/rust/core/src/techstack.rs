//! Technology-stack detection: render the site, pull technical signals
//! out of the HTML, and have the model name the technologies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use url::Url;

use leadscout_scraper::PageRenderer;
use leadscout_shared::{LeadScoutError, Result, TechCategories};

use crate::llm::{GenerationOptions, LanguageModel, parse_json_object, truncate_chars};

const MAX_SCRIPTS: usize = 15;
const MAX_META: usize = 10;
const HTML_SAMPLE_CHARS: usize = 2000;

const ANALYTICS: &[&str] = &[
    "google-analytics", "gtag", "ga(", "datalayer", "segment", "mixpanel", "amplitude", "heap",
];
const FRAMEWORKS: &[&str] = &["react", "vue", "angular", "next.js", "nuxt", "gatsby", "svelte", "ember"];
const CMS: &[&str] = &[
    "wp-content", "wordpress", "drupal", "joomla", "shopify", "wix", "squarespace", "webflow",
];
const HOSTING: &[&str] = &["cloudflare", "fastly", "akamai", "amazonaws", "vercel", "netlify", "heroku"];
const INTEGRATIONS: &[&str] = &["stripe", "paypal", "salesforce", "hubspot", "intercom", "zendesk", "auth0"];

/// Model output keys that name technologies, in listing order.
const TECH_KEYS: &[&str] = &[
    "frontend_framework",
    "backend_technology",
    "programming_languages",
    "hosting_provider",
    "cdn",
    "analytics_tools",
    "crm_tools",
    "payment_processing",
    "other_integrations",
    "cms",
];

/// Technologies detected on one company's website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechStack {
    pub domain: String,
    /// Every detected technology, deduped, in category order.
    pub tech_stack: Vec<String>,
    pub categories: TechCategories,
    pub confidence: String,
    pub detection_method: String,
    pub detected_at: DateTime<Utc>,
}

#[async_trait]
pub trait TechDetector: Send + Sync {
    async fn detect(&self, url: &str) -> Result<TechStack>;
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Compact summary of the technical signals in `html`.
pub fn tech_indicators(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut lines = Vec::new();

    let scripts: Vec<&str> = Selector::parse("script[src]")
        .ok()
        .map(|sel| {
            doc.select(&sel)
                .filter_map(|el| el.value().attr("src"))
                .take(MAX_SCRIPTS)
                .collect()
        })
        .unwrap_or_default();
    if !scripts.is_empty() {
        lines.push(format!("Script Sources: {}", scripts.join(", ")));
    }

    let metas: Vec<String> = Selector::parse("meta[name][content]")
        .ok()
        .map(|sel| {
            doc.select(&sel)
                .filter_map(|el| {
                    let v = el.value();
                    Some(format!("{}={}", v.attr("name")?, v.attr("content")?))
                })
                .take(MAX_META)
                .collect()
        })
        .unwrap_or_default();
    if !metas.is_empty() {
        lines.push(format!("Meta Tags: {}", metas.join("; ")));
    }

    let lower = html.to_lowercase();
    for (label, patterns) in [
        ("Analytics Found", ANALYTICS),
        ("Framework Indicators", FRAMEWORKS),
        ("CMS Indicators", CMS),
        ("Hosting/CDN", HOSTING),
        ("Integrations", INTEGRATIONS),
    ] {
        let hits: Vec<&str> = patterns.iter().copied().filter(|p| lower.contains(p)).collect();
        if !hits.is_empty() {
            lines.push(format!("{label}: {}", hits.join(", ")));
        }
    }

    lines.push(format!("\nHTML Sample:\n{}", truncate_chars(html, HTML_SAMPLE_CHARS)));
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Model output
// ---------------------------------------------------------------------------

/// A technology name, or `None` for null, empty, "null" and "unknown".
fn tech_name(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("unknown") {
        None
    } else {
        Some(s.to_string())
    }
}

fn tech_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(tech_name).collect(),
        Some(v) => tech_name(v).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Shape the model's answer into a [`TechStack`].
pub fn format_tech_stack(raw: &Value, domain: &str, detected_at: DateTime<Utc>) -> TechStack {
    let mut tech_stack: Vec<String> = Vec::new();
    for key in TECH_KEYS {
        for name in tech_names(raw.get(*key)) {
            if !tech_stack.contains(&name) {
                tech_stack.push(name);
            }
        }
    }

    let single = |key: &str| raw.get(key).and_then(tech_name);
    let categories = TechCategories {
        frontend: single("frontend_framework"),
        backend: single("backend_technology"),
        hosting: single("hosting_provider"),
        analytics: tech_names(raw.get("analytics_tools")),
        crm: tech_names(raw.get("crm_tools")),
        cms: single("cms"),
    };

    TechStack {
        domain: domain.to_string(),
        tech_stack,
        categories,
        confidence: raw
            .get("confidence")
            .and_then(Value::as_str)
            .unwrap_or("medium")
            .to_string(),
        detection_method: "firecrawl_llm".into(),
        detected_at,
    }
}

fn analysis_prompt(domain: &str, indicators: &str) -> String {
    format!(
        r#"You are a technology detection expert. Identify the technologies used by {domain} from these indicators.

TECHNICAL INDICATORS:
{indicators}

Rules:
- Only include technologies there is evidence for; do not guess
- Be specific ("Next.js", not just "React")
- Infer obvious relationships (Next.js implies React and Node.js; wp-content implies WordPress and PHP)

Return ONLY this JSON:
{{
  "frontend_framework": "string or null",
  "backend_technology": "string or null",
  "programming_languages": ["string"],
  "hosting_provider": "string or null",
  "cdn": "string or null",
  "analytics_tools": ["string"],
  "crm_tools": ["string"],
  "payment_processing": ["string"],
  "other_integrations": ["string"],
  "cms": "string or null",
  "confidence": "high/medium/low",
  "reasoning": "Brief explanation"
}}"#
    )
}

/// Host without `www.`, or the input itself when it is not a URL.
fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct TechStackDetector {
    renderer: Arc<dyn PageRenderer>,
    model: Arc<dyn LanguageModel>,
}

impl TechStackDetector {
    pub fn new(renderer: Arc<dyn PageRenderer>, model: Arc<dyn LanguageModel>) -> Self {
        Self { renderer, model }
    }
}

#[async_trait]
impl TechDetector for TechStackDetector {
    #[instrument(skip_all, fields(url = %url))]
    async fn detect(&self, url: &str) -> Result<TechStack> {
        let domain = domain_of(url);
        let page = self.renderer.render(url).await?;
        let html = page
            .html
            .ok_or_else(|| LeadScoutError::empty(format!("renderer returned no HTML for {url}")))?;

        let indicators = tech_indicators(&html);
        let reply = self
            .model
            .generate(
                &analysis_prompt(&domain, &indicators),
                GenerationOptions::new(0.1, 1000),
            )
            .await?;
        let raw: Value = parse_json_object(&reply, "tech stack")?;

        let stack = format_tech_stack(&raw, &domain, Utc::now());
        info!(domain, technologies = stack.tech_stack.len(), "tech stack detected");
        Ok(stack)
    }
}
