//! Administrative SQL-dump parsing
//!
//! The forum's admin export emits one bulk `REPLACE INTO` statement per
//! row. This module parses that text into typed member/topic/post records
//! by fixed column index, which is how the export lays its tables out.
//! Post timestamps here are authoritative unix values, unlike the
//! best-effort dates scraped from rendered pages.

use crate::parse::ParseError;
use chrono::DateTime;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

// Column indices of the export's posts table
const POST_COL_AUTHOR_ID: usize = 3;
const POST_COL_AUTHOR_NAME: usize = 4;
const POST_COL_POST_DATE: usize = 8;
const POST_COL_TOPIC_ID: usize = 12;
const POST_COL_FORUM_ID: usize = 13;

// Column indices of the export's topics table
const TOPIC_COL_ID: usize = 0;
const TOPIC_COL_TITLE: usize = 1;
const TOPIC_COL_LAST_POSTER_ID: usize = 7;
const TOPIC_COL_LAST_POST_DATE: usize = 8;
const TOPIC_COL_LAST_POSTER_NAME: usize = 11;
const TOPIC_COL_FORUM_ID: usize = 15;

// Column indices of the export's members table
const MEMBER_COL_ID: usize = 0;
const MEMBER_COL_NAME: usize = 1;
const MEMBER_COL_POST_COUNT: usize = 9;

/// One parsed SQL value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Ids appear as bare integers but occasionally as quoted strings
    fn as_id(&self) -> Option<String> {
        match self {
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Text(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// A post row from the dump
#[derive(Debug, Clone)]
pub struct DumpPost {
    pub character_id: String,
    pub thread_id: Option<String>,
    /// ISO date derived from the authoritative unix timestamp
    pub posted_at: Option<String>,
    pub forum_id: Option<String>,
    pub author_name: Option<String>,
}

/// A topic (thread) row from the dump
#[derive(Debug, Clone)]
pub struct DumpTopic {
    pub thread_id: String,
    pub title: String,
    pub forum_id: Option<String>,
    pub last_poster_id: Option<String>,
    pub last_poster_name: Option<String>,
    pub last_post_date: Option<String>,
}

/// A member row from the dump
#[derive(Debug, Clone)]
pub struct DumpMember {
    pub member_id: String,
    pub name: String,
    pub post_count: i64,
}

fn replace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^REPLACE INTO `\w+?_(\w+)` VALUES\s*\((.+)\);?\s*$")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Parses dump text into rows grouped by table name (prefix stripped)
pub fn parse_dump(sql_text: &str) -> HashMap<String, Vec<Vec<SqlValue>>> {
    let mut tables: HashMap<String, Vec<Vec<SqlValue>>> = HashMap::new();

    for line in sql_text.lines() {
        let line = line.trim();
        if !line.starts_with("REPLACE") {
            continue;
        }

        let caps = match replace_re().captures(line) {
            Some(c) => c,
            None => continue,
        };

        match parse_values(&caps[2]) {
            Ok(row) => tables.entry(caps[1].to_string()).or_default().push(row),
            Err(e) => {
                tracing::debug!("Skipping malformed dump row: {}", e);
            }
        }
    }

    tables
}

/// Parses the VALUES payload of one statement
///
/// Strings are single-quoted with backslash escapes; numbers and NULL are
/// bare. HTML entities in strings are unfolded, matching how the export
/// encodes them.
fn parse_values(values: &str) -> Result<Vec<SqlValue>, ParseError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut was_quoted = false;
    let mut chars = values.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quote => {
                // Escaped character inside a string literal
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(ParseError::MalformedDump(
                            "dangling escape at end of values".to_string(),
                        ))
                    }
                }
            }
            '\'' if in_quote => {
                in_quote = false;
            }
            '\'' => {
                in_quote = true;
                was_quoted = true;
            }
            ',' if !in_quote => {
                out.push(finish_value(&current, was_quoted));
                current.clear();
                was_quoted = false;
            }
            c => current.push(c),
        }
    }

    if in_quote {
        return Err(ParseError::MalformedDump(
            "unterminated string literal".to_string(),
        ));
    }

    out.push(finish_value(&current, was_quoted));
    Ok(out)
}

fn finish_value(raw: &str, was_quoted: bool) -> SqlValue {
    if was_quoted {
        return SqlValue::Text(unescape_entities(raw));
    }

    let trimmed = raw.trim();
    if trimmed == "NULL" {
        SqlValue::Null
    } else if let Ok(i) = trimmed.parse::<i64>() {
        SqlValue::Int(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        SqlValue::Float(f)
    } else {
        SqlValue::Text(trimmed.to_string())
    }
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
}

/// Converts a unix timestamp value to an ISO date string
fn unix_to_date(value: &SqlValue) -> Option<String> {
    let ts = value.as_int().filter(|ts| *ts > 0)?;
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
}

/// Extracts post records from parsed dump tables
pub fn extract_posts(tables: &HashMap<String, Vec<Vec<SqlValue>>>) -> Vec<DumpPost> {
    let rows = match tables.get("posts") {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    rows.iter()
        .filter(|row| row.len() > POST_COL_FORUM_ID.max(POST_COL_TOPIC_ID))
        .filter_map(|row| {
            let character_id = row[POST_COL_AUTHOR_ID].as_id()?;
            Some(DumpPost {
                character_id,
                thread_id: row[POST_COL_TOPIC_ID].as_id(),
                posted_at: unix_to_date(&row[POST_COL_POST_DATE]),
                forum_id: row[POST_COL_FORUM_ID].as_id(),
                author_name: row[POST_COL_AUTHOR_NAME].as_str().map(str::to_string),
            })
        })
        .collect()
}

/// Extracts topic records from parsed dump tables
pub fn extract_topics(tables: &HashMap<String, Vec<Vec<SqlValue>>>) -> Vec<DumpTopic> {
    let rows = match tables.get("topics") {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    rows.iter()
        .filter(|row| row.len() > TOPIC_COL_FORUM_ID)
        .filter_map(|row| {
            let thread_id = row[TOPIC_COL_ID].as_id()?;
            Some(DumpTopic {
                thread_id,
                title: row[TOPIC_COL_TITLE]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| "Untitled".to_string()),
                forum_id: row[TOPIC_COL_FORUM_ID].as_id(),
                last_poster_id: row[TOPIC_COL_LAST_POSTER_ID].as_id(),
                last_poster_name: row[TOPIC_COL_LAST_POSTER_NAME]
                    .as_str()
                    .map(str::to_string),
                last_post_date: unix_to_date(&row[TOPIC_COL_LAST_POST_DATE]),
            })
        })
        .collect()
}

/// Extracts member records from parsed dump tables
pub fn extract_members(tables: &HashMap<String, Vec<Vec<SqlValue>>>) -> Vec<DumpMember> {
    let rows = match tables.get("members") {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    rows.iter()
        .filter(|row| row.len() > MEMBER_COL_POST_COUNT)
        .filter_map(|row| {
            let member_id = row[MEMBER_COL_ID].as_id()?;
            Some(DumpMember {
                member_id,
                name: row[MEMBER_COL_NAME]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| "Unknown".to_string()),
                post_count: row[MEMBER_COL_POST_COUNT].as_int().unwrap_or(0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values_mixed_types() {
        let row = parse_values(r"1,'hello',NULL,2.5,'it\'s fine'").unwrap();
        assert_eq!(
            row,
            vec![
                SqlValue::Int(1),
                SqlValue::Text("hello".to_string()),
                SqlValue::Null,
                SqlValue::Float(2.5),
                SqlValue::Text("it's fine".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_values_comma_inside_string() {
        let row = parse_values("'one, two',3").unwrap();
        assert_eq!(
            row,
            vec![SqlValue::Text("one, two".to_string()), SqlValue::Int(3)]
        );
    }

    #[test]
    fn test_parse_values_entities_unescaped() {
        let row = parse_values("'Tom &amp; Jerry &quot;live&quot;'").unwrap();
        assert_eq!(row, vec![SqlValue::Text(r#"Tom & Jerry "live""#.to_string())]);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(parse_values("'oops").is_err());
    }

    fn posts_dump() -> String {
        // Columns 0..=13; author id at 3, name at 4, date at 8, topic at 12,
        // forum at 13
        [
            "CREATE TABLE `ibf_posts` (...);",
            "REPLACE INTO `ibf_posts` VALUES (1,0,0,42,'Scarlet Vane',0,0,0,1736899800,0,'<p>body</p>',0,100,12);",
            "REPLACE INTO `ibf_posts` VALUES (2,0,0,7,'Mirage',0,0,0,0,0,'<p>x</p>',0,100,12);",
        ]
        .join("\n")
    }

    #[test]
    fn test_extract_posts() {
        let tables = parse_dump(&posts_dump());
        let posts = extract_posts(&tables);

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].character_id, "42");
        assert_eq!(posts[0].thread_id.as_deref(), Some("100"));
        assert_eq!(posts[0].forum_id.as_deref(), Some("12"));
        assert_eq!(posts[0].author_name.as_deref(), Some("Scarlet Vane"));
        assert_eq!(posts[0].posted_at.as_deref(), Some("2025-01-15"));
        // Zero timestamp resolves to no date, not epoch
        assert!(posts[1].posted_at.is_none());
    }

    #[test]
    fn test_extract_topics() {
        let sql = "REPLACE INTO `ibf_topics` VALUES (100,'Midnight Run',0,1,0,0,0,7,1736899800,0,0,'Mirage',0,0,0,12);";
        let tables = parse_dump(sql);
        let topics = extract_topics(&tables);

        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].thread_id, "100");
        assert_eq!(topics[0].title, "Midnight Run");
        assert_eq!(topics[0].forum_id.as_deref(), Some("12"));
        assert_eq!(topics[0].last_poster_id.as_deref(), Some("7"));
        assert_eq!(topics[0].last_poster_name.as_deref(), Some("Mirage"));
    }

    #[test]
    fn test_extract_members() {
        let sql = "REPLACE INTO `ibf_members` VALUES (42,'Scarlet Vane',0,0,0,0,0,0,0,317);";
        let tables = parse_dump(sql);
        let members = extract_members(&tables);

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].member_id, "42");
        assert_eq!(members[0].name, "Scarlet Vane");
        assert_eq!(members[0].post_count, 317);
    }

    #[test]
    fn test_short_rows_skipped() {
        let sql = "REPLACE INTO `ibf_posts` VALUES (1,2,3);";
        let tables = parse_dump(sql);
        assert!(extract_posts(&tables).is_empty());
    }
}
