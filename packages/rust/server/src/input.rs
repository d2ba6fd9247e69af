//! Combining user-supplied inputs into one block of seller content.

use leadscout_scraper::clean_text;

/// Pasted text shorter than this is ignored.
pub const MIN_RAW_TEXT_CHARS: usize = 50;

/// Source label for sessions seeded without a URL.
pub const MULTI_INPUT_SOURCE: &str = "multi-input";

/// One piece of seller content and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPart {
    pub source: String,
    pub content: String,
}

/// Whitespace-normalized parts, exact duplicates dropped, joined by a blank line.
pub fn aggregate(parts: &[InputPart]) -> String {
    let mut seen: Vec<String> = Vec::new();
    for part in parts {
        let text = clean_text(&part.content);
        if !text.is_empty() && !seen.contains(&text) {
            seen.push(text);
        }
    }
    seen.join("\n\n")
}

/// Pasted text, if long enough to be worth using.
pub fn raw_text_part(raw: &str) -> Option<InputPart> {
    let raw = raw.trim();
    (raw.chars().count() >= MIN_RAW_TEXT_CHARS).then(|| InputPart {
        source: "Raw Text".into(),
        content: raw.to_string(),
    })
}
