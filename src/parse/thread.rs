//! Thread page parsing
//!
//! The theme wraps each post in a `.pr-a` container with the author block
//! in `.pr-j`, the post date in `.pr-d` and the body in `.postcolor`.
//! Multi-page threads link their pages through `st=` pagination offsets;
//! the last poster is read from the final post of the resolved last page.

use crate::parse::{
    forum_id_from_href, max_pagination_offset, page_title, user_id_from_href,
};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Posts-per-page block size used by thread pagination
pub const THREAD_PAGE_SIZE: u32 = 25;

/// Last poster info extracted from a thread page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPoster {
    pub name: String,
    pub user_id: Option<String>,
}

/// One observed post: who posted, and when (when determinable)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub character_id: String,
    /// ISO date (YYYY-MM-DD); None when the page shows no parseable date
    pub posted_at: Option<String>,
}

fn post_sel() -> Option<Selector> {
    Selector::parse(".pr-a").ok()
}

fn author_link_sel() -> Option<Selector> {
    Selector::parse(r#".pr-j a[href*="showuser="]"#).ok()
}

/// Extracts the last poster from a thread page
///
/// Callers handling multi-page threads must pass the final page; the
/// result reflects the last `.pr-a` container on the given page only.
pub fn parse_last_poster(html: &str) -> Option<LastPoster> {
    let document = Html::parse_document(html);
    let posts = post_sel()?;
    let name_sel = Selector::parse(".pr-j").ok()?;

    let last_post = document.select(&posts).last()?;
    let name_el = last_post.select(&name_sel).next()?;
    let name = name_el.text().collect::<String>().trim().to_string();
    if name.is_empty() {
        return None;
    }

    let user_id = author_link_sel().and_then(|sel| {
        last_post
            .select(&sel)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(user_id_from_href)
    });

    Some(LastPoster { name, user_id })
}

/// Highest `st=` offset linked from thread pagination, 0 if single page
pub fn parse_thread_pagination(html: &str) -> u32 {
    let document = Html::parse_document(html);
    max_pagination_offset(&document)
}

/// All unique author member ids appearing on a thread page
pub fn extract_thread_authors(html: &str) -> HashSet<String> {
    let document = Html::parse_document(html);
    let mut authors = HashSet::new();

    if let (Some(posts), Some(link_sel)) = (post_sel(), author_link_sel()) {
        for post in document.select(&posts) {
            if let Some(id) = post
                .select(&link_sel)
                .next()
                .and_then(|link| link.value().attr("href"))
                .and_then(user_id_from_href)
            {
                authors.insert(id);
            }
        }
    }

    authors
}

/// Extracts per-post records (author id + best-effort date) from a page
///
/// `today` anchors the forum's relative "Today"/"Yesterday" date strings;
/// pass the current UTC date in production.
pub fn extract_post_records(html: &str, today: NaiveDate) -> Vec<PostRecord> {
    let document = Html::parse_document(html);
    let mut records = Vec::new();

    let (posts, link_sel) = match (post_sel(), author_link_sel()) {
        (Some(p), Some(l)) => (p, l),
        _ => return records,
    };
    let date_sel = Selector::parse(".pr-d").ok();

    for post in document.select(&posts) {
        let character_id = match post
            .select(&link_sel)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(user_id_from_href)
        {
            Some(id) => id,
            None => continue,
        };

        let posted_at = date_sel
            .as_ref()
            .and_then(|sel| post.select(sel).next())
            .and_then(|el| parse_post_date(&joined_text(el), today))
            .or_else(|| header_date(post, today));

        records.push(PostRecord {
            character_id,
            posted_at,
        });
    }

    records
}

fn joined_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

/// Fallback date scan over a post's header text (everything outside the
/// post body)
fn header_date(post: ElementRef<'_>, today: NaiveDate) -> Option<String> {
    let body_sel = Selector::parse(".postcolor").ok()?;
    let body_texts: HashSet<String> = post
        .select(&body_sel)
        .map(|b| joined_text(b))
        .collect();

    let all = joined_text(post);
    let mut header = all;
    for body in &body_texts {
        header = header.replacen(body.as_str(), "", 1);
    }
    parse_post_date(&header, today)
}

fn absolute_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+(\d{1,2})\s+(\d{4})")
            .unwrap_or_else(|_| unreachable!())
    })
}

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parses a forum date string ("Jan 15 2026, 08:30 PM", "Today, 08:30 PM",
/// "Yesterday, 05:12 AM") into an ISO date
pub fn parse_post_date(text: &str, today: NaiveDate) -> Option<String> {
    // The forum substitutes relative labels for recent posts
    let lower = text.to_lowercase();
    if lower.contains("today") {
        return Some(today.format("%Y-%m-%d").to_string());
    }
    if lower.contains("yesterday") {
        return Some(today.pred_opt()?.format("%Y-%m-%d").to_string());
    }

    let caps = absolute_date_re().captures(text)?;
    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(&caps[1]))?
        + 1;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month as u32, day).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Thread title from the page title, which reads "Board Name -> Title"
pub fn parse_thread_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let full_title = page_title(&document)?;
    // rsplit always yields at least one segment
    full_title
        .rsplit("->")
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Owning forum id and name from the thread page's breadcrumb link
pub fn parse_thread_forum(html: &str) -> (Option<String>, Option<String>) {
    let document = Html::parse_document(html);
    let selector = match Selector::parse(r#"a[href*="showforum="]"#).ok() {
        Some(s) => s,
        None => return (None, None),
    };

    match document.select(&selector).next() {
        Some(link) => {
            let id = link.value().attr("href").and_then(forum_id_from_href);
            let name = Some(link.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty());
            (id, name)
        }
        None => (None, None),
    }
}
