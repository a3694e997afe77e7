//! Post-search result page parsing
//!
//! The forum's search lists every thread a member has posted in, paginated
//! in blocks of [`SEARCH_PAGE_SIZE`]. The first page carries pagination
//! links from which the remaining page URLs are derived. Some searches
//! return an interstitial meta-refresh redirect before the results.

use crate::config::ForumConfig;
use crate::parse::{
    forum_id_from_href, max_pagination_offset, offset_re, thread_id_from_href,
};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Results-per-page block size used by the forum's search pagination
pub const SEARCH_PAGE_SIZE: u32 = 25;

/// A thread extracted from a search result page
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub thread_id: String,
    pub title: String,
    pub url: String,
    pub forum_id: Option<String>,
    pub forum_name: Option<String>,
}

/// One parsed search result page
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// URLs of the remaining result pages; empty on the last (or only)
    /// page, the terminal marker distinct from an error
    pub page_urls: Vec<String>,
}

fn refresh_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)url=(.+)$").unwrap_or_else(|_| unreachable!()))
}

fn absolutize(href: &str, base_url: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}/{}", base_url, href.trim_start_matches('/'))
    }
}

/// Parses a search result page into hits plus the remaining page URLs
///
/// Threads in excluded forums are dropped here and never surfaced to the
/// caller. Duplicate thread ids within one page collapse to the first hit.
pub fn parse_search_results(html: &str, base_url: &str, forum: &ForumConfig) -> SearchResults {
    let document = Html::parse_document(html);

    let page_urls = search_page_urls(&document, base_url);

    let mut hits = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    let result_sel = match Selector::parse(".tableborder").ok() {
        Some(s) => s,
        None => return SearchResults::default(),
    };
    let topic_sel = match Selector::parse(r#"a[href*="showtopic="]"#).ok() {
        Some(s) => s,
        None => return SearchResults::default(),
    };
    let forum_sel = Selector::parse(r#"a[href*="showforum="]"#).ok();

    for result in document.select(&result_sel) {
        let topic_link = match result.select(&topic_sel).next() {
            Some(l) => l,
            None => continue,
        };
        let href = topic_link.value().attr("href").unwrap_or("");
        let thread_id = match thread_id_from_href(href) {
            Some(id) => id,
            None => continue,
        };

        if !seen_ids.insert(thread_id.clone()) {
            continue;
        }

        let (forum_id, forum_name) = match &forum_sel {
            Some(sel) => match result.select(sel).next() {
                Some(link) => (
                    link.value().attr("href").and_then(forum_id_from_href),
                    Some(link.text().collect::<String>().trim().to_string())
                        .filter(|s| !s.is_empty()),
                ),
                None => (None, None),
            },
            None => (None, None),
        };

        if let Some(id) = forum_id.as_deref() {
            if forum.is_forum_excluded(id) {
                continue;
            }
        }

        let title = topic_link.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }

        hits.push(SearchHit {
            thread_id,
            title,
            url: absolutize(href, base_url),
            forum_id,
            forum_name,
        });
    }

    SearchResults { hits, page_urls }
}

/// Derives the remaining result-page URLs from the pagination block
fn search_page_urls(document: &Html, base_url: &str) -> Vec<String> {
    let max_offset = max_pagination_offset(document);
    if max_offset == 0 {
        return Vec::new();
    }

    // Take the highest-offset link as the URL template and strip its
    // offset parameter back out
    let mut template = String::new();
    if let Ok(selector) = Selector::parse(".pagination a[href]") {
        let mut best = 0;
        for link in document.select(&selector) {
            let href = link.value().attr("href").unwrap_or("");
            if href.contains("javascript:") {
                continue;
            }
            if let Some(cap) = offset_re().captures(href) {
                if let Ok(offset) = cap[1].parse::<u32>() {
                    if offset >= best {
                        best = offset;
                        template = absolutize(href, base_url);
                    }
                }
            }
        }
    }

    if template.is_empty() {
        return Vec::new();
    }

    let template = strip_offset_param(&template);
    let sep = if template.contains('?') { '&' } else { '?' };

    (1..=max_offset / SEARCH_PAGE_SIZE)
        .map(|page| format!("{}{}st={}", template, sep, page * SEARCH_PAGE_SIZE))
        .collect()
}

fn strip_offset_param(url: &str) -> String {
    let mut out = url.to_string();
    for pattern in [r"&st=\d+", r"\?st=\d+&", r"\?st=\d+$"] {
        if let Ok(re) = Regex::new(pattern) {
            out = re
                .replace(&out, |caps: &regex::Captures<'_>| {
                    if caps[0].starts_with('?') && caps[0].ends_with('&') {
                        "?".to_string()
                    } else {
                        String::new()
                    }
                })
                .into_owned();
        }
    }
    out
}

/// Detects the interstitial meta-refresh redirect some searches return
pub fn parse_search_redirect(html: &str, base_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"meta[http-equiv="refresh"]"#).ok()?;

    let content = document
        .select(&selector)
        .next()?
        .value()
        .attr("content")?;

    refresh_url_re()
        .captures(content)
        .map(|cap| absolutize(cap[1].trim(), base_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://rp.example.net";

    fn forum_config() -> ForumConfig {
        ForumConfig {
            base_url: BASE.to_string(),
            complete_forum_id: "49".to_string(),
            incomplete_forum_id: "59".to_string(),
            comms_forum_id: "31".to_string(),
            excluded_forum_ids: vec!["4".to_string()],
            excluded_names: vec![],
        }
    }

    fn result_div(thread_id: &str, title: &str, forum_id: &str, forum_name: &str) -> String {
        format!(
            r#"<div class="tableborder">
                <a href="/index.php?showtopic={}">{}</a>
                <a href="/index.php?showforum={}">{}</a>
            </div>"#,
            thread_id, title, forum_id, forum_name
        )
    }

    #[test]
    fn test_parse_hits() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            result_div("100", "Midnight Run", "12", "The City"),
            result_div("101", "Dead Drop", "49", "Archive")
        );
        let results = parse_search_results(&html, BASE, &forum_config());

        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.hits[0].thread_id, "100");
        assert_eq!(results.hits[0].title, "Midnight Run");
        assert_eq!(
            results.hits[0].url,
            "https://rp.example.net/index.php?showtopic=100"
        );
        assert_eq!(results.hits[0].forum_id.as_deref(), Some("12"));
        assert_eq!(results.hits[0].forum_name.as_deref(), Some("The City"));
        assert!(results.page_urls.is_empty());
    }

    #[test]
    fn test_excluded_forum_dropped() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            result_div("100", "Kept", "12", "The City"),
            result_div("101", "Dropped", "4", "Staff Area")
        );
        let results = parse_search_results(&html, BASE, &forum_config());

        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].thread_id, "100");
    }

    #[test]
    fn test_duplicate_thread_ids_collapse() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            result_div("100", "First", "12", "The City"),
            result_div("100", "Second", "12", "The City")
        );
        let results = parse_search_results(&html, BASE, &forum_config());
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].title, "First");
    }

    #[test]
    fn test_pagination_urls() {
        let html = format!(
            r#"<html><body>
            <div class="pagination">
                <a href="/index.php?act=Search&searchid=abc&st=25">2</a>
                <a href="/index.php?act=Search&searchid=abc&st=50">3</a>
            </div>
            {}
            </body></html>"#,
            result_div("100", "Midnight Run", "12", "The City")
        );
        let results = parse_search_results(&html, BASE, &forum_config());

        assert_eq!(
            results.page_urls,
            vec![
                "https://rp.example.net/index.php?act=Search&searchid=abc&st=25".to_string(),
                "https://rp.example.net/index.php?act=Search&searchid=abc&st=50".to_string(),
            ]
        );
    }

    #[test]
    fn test_single_page_is_terminal() {
        let html = format!(
            "<html><body>{}</body></html>",
            result_div("100", "Only Page", "12", "The City")
        );
        let results = parse_search_results(&html, BASE, &forum_config());
        assert!(results.page_urls.is_empty());
    }

    #[test]
    fn test_parse_search_redirect() {
        let html = r#"<html><head>
            <meta http-equiv="refresh" content="0; url=/index.php?act=Search&searchid=xyz">
        </head></html>"#;
        assert_eq!(
            parse_search_redirect(html, BASE).as_deref(),
            Some("https://rp.example.net/index.php?act=Search&searchid=xyz")
        );
    }

    #[test]
    fn test_no_redirect() {
        assert!(parse_search_redirect("<html><head></head></html>", BASE).is_none());
    }
}
