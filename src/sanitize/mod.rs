//! HTML sanitization and scrape quality/paywall scoring.
//!
//! Used by the Scrape node (`collectors` feature) before content is handed to
//! Summarize. No HTML-mutation crate is in the teacher's dependency stack, so
//! stripping is done with plain string scanning ahead of a `scraper`-based
//! text extraction pass — `scraper` parses read-only, it has no API to delete
//! nodes, so the unwanted tags must be gone before the document is parsed.

use scraper::{Html, Selector};

/// Case-insensitive marker substrings that indicate an attempted prompt
/// injection embedded in scraped page content. Not exhaustive; extend as new
/// patterns are observed.
const PROMPT_INJECTION_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous instructions",
    "disregard the above",
    "you are now",
    "system prompt:",
    "###instruction",
    "new instructions:",
];

const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to continue reading",
    "subscribe to read",
    "this content is for subscribers",
    "sign in to read more",
    "create a free account to continue",
    "you have reached your limit of free articles",
    "become a member to continue",
];

/// Strip `<tag ...> ... </tag>` blocks (case-insensitive, non-nested) from
/// `html`, including the tags themselves.
fn strip_blocks(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open_needle = format!("<{tag}");
    let close_needle = format!("</{tag}>");
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0usize;

    loop {
        let Some(open_rel) = lower[cursor..].find(&open_needle) else {
            out.push_str(&html[cursor..]);
            break;
        };
        let open_abs = cursor + open_rel;
        out.push_str(&html[cursor..open_abs]);

        let Some(close_rel) = lower[open_abs..].find(&close_needle) else {
            // Unterminated block; drop the remainder rather than emit a
            // dangling open tag.
            break;
        };
        cursor = open_abs + close_rel + close_needle.len();
    }
    out
}

fn strip_comments(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0usize;
    loop {
        let Some(open_rel) = html[cursor..].find("<!--") else {
            out.push_str(&html[cursor..]);
            break;
        };
        let open_abs = cursor + open_rel;
        out.push_str(&html[cursor..open_abs]);
        let Some(close_rel) = html[open_abs..].find("-->") else {
            break;
        };
        cursor = open_abs + close_rel + 3;
    }
    out
}

fn mask_prompt_injection(text: &str) -> String {
    let mut masked = text.to_string();
    let lower = text.to_ascii_lowercase();
    for marker in PROMPT_INJECTION_MARKERS {
        if lower.contains(marker) {
            // Replace case-insensitively by locating each occurrence in the
            // lowercase copy and substituting the same byte range in `masked`.
            masked = replace_case_insensitive(&masked, marker, "[REMOVED]");
        }
    }
    masked
}

fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0usize;
    while let Some(rel) = lower[cursor..].find(needle) {
        let abs = cursor + rel;
        out.push_str(&haystack[cursor..abs]);
        out.push_str(replacement);
        cursor = abs + needle.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}

/// Extracted, sanitized plain text plus signals used for quality/paywall
/// scoring.
#[derive(Clone, Debug, Default)]
pub struct SanitizedPage {
    pub text: String,
    pub word_count: u32,
    pub quality_score: f32,
    pub paywall_score: f32,
}

/// Strip dangerous/boilerplate markup and extract readable text, scoring it
/// for quality and paywall likelihood.
///
/// Content over `max_bytes` is truncated before parsing (a defense against
/// pathological pages eating the scrape concurrency budget).
pub fn sanitize_and_score(raw_html: &str, max_bytes: usize) -> SanitizedPage {
    let capped = if raw_html.len() > max_bytes {
        &raw_html[..max_bytes]
    } else {
        raw_html
    };

    let mut cleaned = strip_blocks(capped, "script");
    cleaned = strip_blocks(&cleaned, "style");
    cleaned = strip_blocks(&cleaned, "iframe");
    cleaned = strip_blocks(&cleaned, "noscript");
    cleaned = strip_comments(&cleaned);

    let document = Html::parse_document(&cleaned);
    let body_selector = Selector::parse("body").unwrap_or_else(|_| Selector::parse("html").unwrap());
    let text: String = document
        .select(&body_selector)
        .next()
        .map(|body| {
            body.text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    let text = mask_prompt_injection(&text);

    let link_selector = Selector::parse("a").unwrap();
    let link_text_chars: usize = document
        .select(&link_selector)
        .map(|el| el.text().collect::<String>().len())
        .sum();

    let total_chars = text.len().max(1);
    let word_count = text.split_whitespace().count() as u32;
    let link_density = link_text_chars as f32 / total_chars as f32;
    let content_density = text.len() as f32 / raw_html.len().max(1) as f32;

    let sentence_count = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let avg_sentence_len = word_count as f32 / sentence_count as f32;

    let boilerplate_lines = text
        .lines()
        .filter(|line| line.split_whitespace().count() < 4)
        .count();
    let total_lines = text.lines().count().max(1);
    let boilerplate_ratio = boilerplate_lines as f32 / total_lines as f32;

    // Weighted composite: rewards substantial, link-light, non-boilerplate
    // prose with plausible sentence lengths; every term is already in [0,1].
    let length_signal = (word_count as f32 / 300.0).min(1.0);
    let sentence_signal = if (8.0..=35.0).contains(&avg_sentence_len) {
        1.0
    } else {
        0.4
    };
    let quality_score = (length_signal * 0.35
        + (1.0 - link_density).clamp(0.0, 1.0) * 0.25
        + (1.0 - boilerplate_ratio).clamp(0.0, 1.0) * 0.25
        + content_density.min(1.0) * 0.05
        + sentence_signal * 0.10)
        .clamp(0.0, 1.0);

    let lower_text = text.to_ascii_lowercase();
    let marker_hits = PAYWALL_MARKERS
        .iter()
        .filter(|marker| lower_text.contains(*marker))
        .count();
    let short_content_signal = if word_count < 120 { 0.3 } else { 0.0 };
    let paywall_score = ((marker_hits as f32 * 0.5) + short_content_signal).clamp(0.0, 1.0);

    SanitizedPage {
        text,
        word_count,
        quality_score,
        paywall_score,
    }
}
