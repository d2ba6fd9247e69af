//! Website scraping for LeadScout.
//!
//! Fetches a company's homepage and about page, extracts readable copy,
//! and falls back to a rendering provider for JavaScript-heavy sites.

pub mod detect;
pub mod extract;
pub mod render;
pub mod urls;
pub mod website;

pub use detect::{JsIndicator, detect_javascript_site};
pub use extract::{element_text, meta_content, page_text};
pub use render::{FirecrawlClient, PageRenderer, RenderedPage};
pub use urls::{clean_text, company_slug, is_ssrf_target, normalize_url, validate_url};
pub use website::{ScrapeMethod, ScrapedSite, SiteScraper, WebsiteScraper};
