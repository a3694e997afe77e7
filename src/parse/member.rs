//! Member-list page parsing, used by the discovery crawl

use crate::parse::{max_pagination_offset, user_id_from_href};
use scraper::{Html, Selector};
use std::collections::HashSet;

/// Members-per-page block size requested from the member list
pub const MEMBER_PAGE_SIZE: u32 = 30;

/// One row of the member list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRow {
    pub member_id: String,
    pub name: String,
}

/// Parses a member-list page into (member id, name) rows
///
/// Duplicate ids on one page (profile link plus avatar link) collapse to
/// the first named occurrence.
pub fn parse_member_list(html: &str) -> Vec<MemberRow> {
    let document = Html::parse_document(html);
    let mut members = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let selector = match Selector::parse(r#"a[href*="showuser="]"#).ok() {
        Some(s) => s,
        None => return members,
    };

    for link in document.select(&selector) {
        let href = link.value().attr("href").unwrap_or("");
        let member_id = match user_id_from_href(href) {
            Some(id) => id,
            None => continue,
        };
        if seen.contains(&member_id) {
            continue;
        }

        let name = link.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            continue;
        }

        seen.insert(member_id.clone());
        members.push(MemberRow { member_id, name });
    }

    members
}

/// Highest `st=` offset linked from member-list pagination, 0 if single page
pub fn parse_member_list_pagination(html: &str) -> u32 {
    let document = Html::parse_document(html);
    max_pagination_offset(&document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_list() {
        let html = r#"<html><body><table>
            <tr><td><a href="/index.php?showuser=42">Scarlet Vane</a></td></tr>
            <tr><td><a href="/index.php?showuser=7">Mirage</a></td></tr>
            <tr><td><a href="/index.php?showuser=42"><img src="av.png"></a></td></tr>
        </table></body></html>"#;

        let members = parse_member_list(html);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member_id, "42");
        assert_eq!(members[0].name, "Scarlet Vane");
        assert_eq!(members[1].member_id, "7");
    }

    #[test]
    fn test_nameless_links_skipped() {
        let html = r#"<html><body>
            <a href="/index.php?showuser=42"></a>
        </body></html>"#;
        assert!(parse_member_list(html).is_empty());
    }

    #[test]
    fn test_pagination_offset() {
        let html = r#"<html><body><div class="pagination">
            <a href="?act=Members&st=30">2</a>
            <a href="?act=Members&st=90">4</a>
        </div></body></html>"#;
        assert_eq!(parse_member_list_pagination(html), 90);
    }
}
