//! Text extraction from company web pages.
//!
//! Company sites are not documentation: the useful copy is spread over
//! hero sections, feature grids and footers. Extraction therefore collects
//! every substantial text block instead of picking a single content root.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};

use crate::urls::clean_text;

/// Containers and text elements worth reading, in priority order.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".content",
    "#content",
    ".main-content",
    r#"[role="main"]"#,
    "section",
    "h1",
    "h2",
    "p",
    r#"div[class*="content"]"#,
    r#"div[class*="text"]"#,
];

/// Elements whose text never counts as page copy.
const NOISE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Blocks shorter than this are navigation crumbs, buttons, and the like.
const MIN_BLOCK_CHARS: usize = 50;

/// Without any block longer than this, fall back to the whole body.
const BODY_FALLBACK_CHARS: usize = 100;

/// Extract readable text from a page: title, meta description, then content blocks.
pub fn page_text(doc: &Html) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(title) = select_first_text(doc, "title") {
        parts.push(format!("Page Title: {title}"));
    }

    if let Some(description) = meta_content(doc, "description") {
        parts.push(format!("Meta Description: {description}"));
    }

    let mut seen: HashSet<String> = HashSet::new();
    for css in CONTENT_SELECTORS {
        let Ok(sel) = Selector::parse(css) else {
            continue;
        };
        for el in doc.select(&sel) {
            let text = element_text(el);
            if text.chars().count() > MIN_BLOCK_CHARS && seen.insert(text.clone()) {
                parts.push(text);
            }
        }
    }

    if !parts.iter().any(|p| p.chars().count() > BODY_FALLBACK_CHARS) {
        if let Ok(body_sel) = Selector::parse("body") {
            if let Some(body) = doc.select(&body_sel).next() {
                parts.push(element_text(body));
            }
        }
    }

    clean_text(&parts.join(" "))
}

/// Visible text of an element, skipping script/style content.
pub fn element_text(el: ElementRef<'_>) -> String {
    let mut pieces: Vec<&str> = Vec::new();

    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_noise = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| NOISE_TAGS.contains(&e.name()))
        });
        if !in_noise {
            pieces.push(&**text);
        }
    }

    clean_text(&pieces.join(" "))
}

/// `content` of `<meta name="...">`, trimmed, if non-empty.
pub fn meta_content(doc: &Html, name: &str) -> Option<String> {
    let sel = Selector::parse("meta[name]").ok()?;
    doc.select(&sel)
        .find(|m| {
            m.value()
                .attr("name")
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn select_first_text(doc: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    doc.select(&sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}
