//! Heuristics for spotting JavaScript-rendered sites.
//!
//! A plain HTTP fetch of a single-page app returns an empty shell. When any
//! rule below fires, the scraper prefers a rendered fetch if one is configured.

use scraper::{Html, Selector};

use crate::extract::{element_text, meta_content};

/// Sites known to ship almost no server-rendered copy.
const KNOWN_JS_DOMAINS: &[&str] = &[
    "neuralink.com",
    "reactjs.org",
    "vuejs.org",
    "angular.io",
    "svelte.dev",
    "nextjs.org",
    "shopify.com",
    "vercel.com",
    "netlify.com",
];

/// Markers left in the HTML shell by SPA frameworks.
const SPA_MARKERS: &[&str] = &[
    r#"<div id="root""#,
    r#"<div id="app""#,
    r#"<div id="__next""#,
    "react-app",
    "vue-app",
    "ng-app",
    "data-reactroot",
    "__nextjs",
    "nextjs-warmup",
];

/// Substrings of bundler/framework script paths.
const FRAMEWORK_SCRIPT_PATTERNS: &[&str] = &[
    ".jsx", ".tsx", "chunk", "bundle", "webpack", "react", "vue", "angular", "svelte", "next",
    "runtime", "framework", "_app", "_document",
];

const GENERATOR_FRAMEWORKS: &[&str] = &["next", "gatsby", "nuxt", "react"];

/// Why a page looks JavaScript-rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsIndicator {
    KnownDomain(String),
    ScriptHeavyShell { text_chars: usize, scripts: usize },
    SpaMarker(&'static str),
    ScriptRatio { scripts: usize, elements: usize },
    FrameworkScript(&'static str),
    Generator(String),
}

impl std::fmt::Display for JsIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KnownDomain(d) => write!(f, "known JS domain {d}"),
            Self::ScriptHeavyShell { text_chars, scripts } => {
                write!(f, "{text_chars} chars of text with {scripts} scripts")
            }
            Self::SpaMarker(m) => write!(f, "SPA marker {m}"),
            Self::ScriptRatio { scripts, elements } => {
                write!(f, "{scripts} of {elements} elements are scripts")
            }
            Self::FrameworkScript(p) => write!(f, "framework script pattern '{p}'"),
            Self::Generator(g) => write!(f, "generator '{g}'"),
        }
    }
}

/// Run the heuristics against a fetched page. Returns the first rule that fires.
pub fn detect_javascript_site(doc: &Html, raw_html: &str, host: &str) -> Option<JsIndicator> {
    let host = host.strip_prefix("www.").unwrap_or(host).to_lowercase();
    if KNOWN_JS_DOMAINS.contains(&host.as_str()) {
        return Some(JsIndicator::KnownDomain(host));
    }

    let script_sel = Selector::parse("script").ok()?;
    let scripts: Vec<_> = doc.select(&script_sel).collect();

    let text_chars = element_text(doc.root_element()).chars().count();
    if text_chars < 500 && scripts.len() > 5 {
        return Some(JsIndicator::ScriptHeavyShell {
            text_chars,
            scripts: scripts.len(),
        });
    }

    let html_lower = raw_html.to_lowercase();
    if let Some(marker) = SPA_MARKERS.iter().find(|m| html_lower.contains(*m)) {
        return Some(JsIndicator::SpaMarker(marker));
    }

    let elements = doc
        .root_element()
        .descendants()
        .filter(|n| n.value().is_element())
        .count();
    if elements > 0 && scripts.len() * 10 > elements * 3 {
        return Some(JsIndicator::ScriptRatio {
            scripts: scripts.len(),
            elements,
        });
    }

    let sources = scripts
        .iter()
        .filter_map(|s| s.value().attr("src"))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if let Some(pattern) = FRAMEWORK_SCRIPT_PATTERNS
        .iter()
        .find(|p| sources.contains(*p))
    {
        return Some(JsIndicator::FrameworkScript(pattern));
    }

    if let Some(generator) = meta_content(doc, "generator") {
        let lower = generator.to_lowercase();
        if GENERATOR_FRAMEWORKS.iter().any(|fw| lower.contains(fw)) {
            return Some(JsIndicator::Generator(generator));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(html: &str, host: &str) -> Option<JsIndicator> {
        let doc = Html::parse_document(html);
        detect_javascript_site(&doc, html, host)
    }

    fn server_rendered_page() -> String {
        let copy = "We install and maintain commercial HVAC systems for office parks, \
                    hospitals and schools across the Midwest. "
            .repeat(8);
        format!(
            r#"<html><head><title>Cool Air Co</title></head>
            <body><main><h1>Cool Air Co</h1><p>{copy}</p></main>
            <script src="/static/site.js"></script></body></html>"#
        )
    }

    #[test]
    fn known_domain_matches_without_www() {
        let hit = detect("<html></html>", "www.vercel.com");
        assert_eq!(hit, Some(JsIndicator::KnownDomain("vercel.com".into())));
    }

    #[test]
    fn next_shell_is_detected() {
        let html = r#"<html><head></head><body><div id="__next"></div></body></html>"#;
        assert!(matches!(
            detect(html, "acme.com"),
            Some(JsIndicator::SpaMarker(_))
        ));
    }

    #[test]
    fn many_scripts_little_text() {
        let scripts = r#"<script src="/a.js"></script>"#.repeat(7);
        let html = format!("<html><body><p>Loading</p>{scripts}</body></html>");
        assert!(matches!(
            detect(&html, "acme.com"),
            Some(JsIndicator::ScriptHeavyShell { scripts: 7, .. })
        ));
    }

    #[test]
    fn bundler_script_paths() {
        let mut html = server_rendered_page();
        html = html.replace("/static/site.js", "/_next/static/chunks/main-abc123.js");
        assert!(matches!(
            detect(&html, "acme.com"),
            Some(JsIndicator::FrameworkScript(_))
        ));
    }

    #[test]
    fn generator_meta() {
        let page = server_rendered_page()
            .replace("<title>", r#"<meta name="generator" content="Gatsby 5.12"><title>"#);
        assert_eq!(
            detect(&page, "acme.com"),
            Some(JsIndicator::Generator("Gatsby 5.12".into()))
        );
    }

    #[test]
    fn server_rendered_site_passes() {
        assert_eq!(detect(&server_rendered_page(), "coolair.com"), None);
    }
}
