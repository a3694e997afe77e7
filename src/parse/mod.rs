//! Markup parsing: pure transforms from raw page content to typed records
//!
//! Every function in this module tree is deterministic and performs no I/O.
//! One submodule per source-page shape:
//! - `profile` - member profile pages (fields, avatar, power grid)
//! - `search` - post-search result listings with pagination
//! - `thread` - thread pages (last poster, authors, post records)
//! - `quote` - dialogue quote extraction from post bodies
//! - `member` - member-list pages for discovery
//! - `dump` - administrative SQL-dump text
//! - `category` - forum-id to thread-category assignment

pub mod category;
pub mod dump;
pub mod member;
pub mod profile;
pub mod quote;
pub mod search;
pub mod thread;

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use thiserror::Error;

pub use category::{categorize, Category};
pub use dump::{DumpMember, DumpPost, DumpTopic};
pub use member::MemberRow;
pub use profile::ParsedProfile;
pub use search::SearchHit;
pub use thread::{LastPoster, PostRecord};

/// Errors for unexpected markup shapes; one item's parse failure never
/// aborts a multi-item operation
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing expected element: {0}")]
    MissingElement(&'static str),

    #[error("Malformed dump statement: {0}")]
    MalformedDump(String),
}

fn id_regex(key: &'static str) -> Regex {
    // Query-param ids are always decimal on the target software
    Regex::new(&format!(r"{}=(\d+)", key)).unwrap_or_else(|_| unreachable!())
}

fn showuser_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| id_regex("showuser"))
}

fn showtopic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| id_regex("showtopic"))
}

fn showforum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| id_regex("showforum"))
}

fn offset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| id_regex("st"))
}

fn style_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(['"]?(https?://[^'"\)\s,]+)['"]?\)"#)
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Extracts the decimal member id from a `showuser=` href
pub(crate) fn user_id_from_href(href: &str) -> Option<String> {
    showuser_re()
        .captures(href)
        .map(|c| c[1].to_string())
}

/// Extracts the decimal thread id from a `showtopic=` href
pub(crate) fn thread_id_from_href(href: &str) -> Option<String> {
    showtopic_re()
        .captures(href)
        .map(|c| c[1].to_string())
}

/// Extracts the decimal forum id from a `showforum=` href
pub(crate) fn forum_id_from_href(href: &str) -> Option<String> {
    showforum_re()
        .captures(href)
        .map(|c| c[1].to_string())
}

/// Extracts the pagination offset from an `st=` href
pub(crate) fn offset_from_href(href: &str) -> Option<u32> {
    offset_re()
        .captures(href)
        .and_then(|c| c[1].parse().ok())
}

/// Extracts the first http(s) URL from a CSS `background-image` style value
pub(crate) fn url_from_style(style: &str) -> Option<String> {
    style_url_re()
        .captures(style)
        .map(|c| c[1].to_string())
}

/// Returns the text of the page's `<title>` element
pub(crate) fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Checks whether the page is the site's "Board Message" interstitial, the
/// cooldown/error page returned in place of real content
pub fn is_board_message(html: &str) -> bool {
    let document = Html::parse_document(html);
    page_title(&document)
        .map(|t| t.contains("Board Message"))
        .unwrap_or(false)
}

/// Highest `st=` pagination offset linked from the page, 0 if single page
pub(crate) fn max_pagination_offset(document: &Html) -> u32 {
    let mut max_offset = 0;
    if let Ok(selector) = Selector::parse(r#".pagination a[href*="st="]"#) {
        for link in document.select(&selector) {
            if let Some(href) = link.value().attr("href") {
                if let Some(offset) = offset_from_href(href) {
                    max_offset = max_offset.max(offset);
                }
            }
        }
    }
    max_offset
}
