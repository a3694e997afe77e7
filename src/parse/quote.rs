//! Dialogue quote extraction
//!
//! A bold/strong run inside a character's own post qualifies as a quote
//! when it is delimited by quotation marks and meets the configured
//! minimum word count. Unicode quote variants are folded to their ASCII
//! forms before uniqueness comparison, so the same line styled with curly
//! and straight quotes dedups to one row.

use scraper::{Html, Selector};

/// Opening quotation marks accepted as a dialogue delimiter
const OPENING_QUOTES: &[char] = &['"', '\'', '\u{201C}', '\u{2018}', '\u{00AB}'];

/// Closing quotation marks stripped from the end of a run
const CLOSING_QUOTES: &[char] = &['"', '\'', '\u{201D}', '\u{2019}', '\u{00BB}'];

/// Longest stored quote; longer runs are cut at a word boundary
const MAX_QUOTE_CHARS: usize = 500;

/// Extracts qualifying dialogue quotes for one character from a thread page
///
/// Only bold runs inside posts authored by `character_name` (matched
/// case-insensitively against the post author block) are considered.
/// Returned quotes are normalized and ready for uniqueness comparison.
pub fn extract_quotes(html: &str, character_name: &str, min_words: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut quotes = Vec::new();

    let (post_sel, name_sel, body_sel, bold_sel) = match (
        Selector::parse(".pr-a").ok(),
        Selector::parse(".pr-j").ok(),
        Selector::parse(".postcolor").ok(),
        Selector::parse("b, strong").ok(),
    ) {
        (Some(p), Some(n), Some(bo), Some(bl)) => (p, n, bo, bl),
        _ => return quotes,
    };

    for post in document.select(&post_sel) {
        let author = match post.select(&name_sel).next() {
            Some(el) => el.text().collect::<String>().trim().to_string(),
            None => continue,
        };
        if !author.eq_ignore_ascii_case(character_name) {
            continue;
        }

        let body = match post.select(&body_sel).next() {
            Some(b) => b,
            None => continue,
        };

        for bold in body.select(&bold_sel) {
            let text = bold.text().collect::<String>().trim().to_string();
            if let Some(quote) = normalize_quote(&text, min_words) {
                quotes.push(quote);
            }
        }
    }

    quotes
}

/// Normalizes a candidate bold run into a stored quote
///
/// Returns `None` when the run is not quotation-delimited or falls below
/// the minimum word count.
pub fn normalize_quote(text: &str, min_words: usize) -> Option<String> {
    let text = text.trim();
    if !text.starts_with(OPENING_QUOTES) {
        return None;
    }

    let inner = text
        .trim_start_matches(OPENING_QUOTES)
        .trim_end_matches(CLOSING_QUOTES)
        .trim();

    if inner.split_whitespace().count() < min_words {
        return None;
    }

    let folded = fold_quote_marks(inner);
    Some(truncate_at_word(&folded, MAX_QUOTE_CHARS))
}

/// Folds unicode quotation variants to their canonical ASCII forms
fn fold_quote_marks(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            c => c,
        })
        .collect()
}

fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rsplit_once(' ') {
        Some((head, _)) => head.to_string(),
        None => cut,
    };
    format!("{}...", trimmed)
}
