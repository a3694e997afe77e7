//! Thread category assignment
//!
//! Category is a closed enumeration derived from the owning forum id and
//! the configured special ids. It is recomputed on every observation of a
//! thread, never accumulated, and never user-supplied.

use crate::config::ForumConfig;

/// Category of a thread, derived from its forum id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Active roleplay threads (any non-special, non-excluded forum)
    Ongoing,
    /// Communication threads (phone calls, letters, texting)
    Comms,
    /// Finished threads moved to the completion archive
    Complete,
    /// Threads abandoned before completion
    Incomplete,
}

impl Category {
    /// Converts to the string stored in the database
    pub fn to_db_string(self) -> &'static str {
        match self {
            Category::Ongoing => "ongoing",
            Category::Comms => "comms",
            Category::Complete => "complete",
            Category::Incomplete => "incomplete",
        }
    }

    /// Parses a database string back to a category
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "ongoing" => Some(Category::Ongoing),
            "comms" => Some(Category::Comms),
            "complete" => Some(Category::Complete),
            "incomplete" => Some(Category::Incomplete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Assigns a category to a thread based on its forum id
///
/// Returns `None` for forum ids on the exclusion list; such threads are
/// never surfaced or stored. A thread whose forum id could not be
/// determined is treated as ongoing.
pub fn categorize(forum_id: Option<&str>, forum: &ForumConfig) -> Option<Category> {
    let id = match forum_id {
        Some(id) => id,
        None => return Some(Category::Ongoing),
    };

    if forum.is_forum_excluded(id) {
        return None;
    }

    if id == forum.complete_forum_id {
        Some(Category::Complete)
    } else if id == forum.incomplete_forum_id {
        Some(Category::Incomplete)
    } else if id == forum.comms_forum_id {
        Some(Category::Comms)
    } else {
        Some(Category::Ongoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forum_config() -> ForumConfig {
        ForumConfig {
            base_url: "https://rp.example.net".to_string(),
            complete_forum_id: "49".to_string(),
            incomplete_forum_id: "59".to_string(),
            comms_forum_id: "31".to_string(),
            excluded_forum_ids: vec!["4".to_string(), "90".to_string()],
            excluded_names: vec![],
        }
    }

    #[test]
    fn test_special_forum_ids() {
        let forum = forum_config();
        assert_eq!(categorize(Some("49"), &forum), Some(Category::Complete));
        assert_eq!(categorize(Some("59"), &forum), Some(Category::Incomplete));
        assert_eq!(categorize(Some("31"), &forum), Some(Category::Comms));
    }

    #[test]
    fn test_other_forums_are_ongoing() {
        let forum = forum_config();
        assert_eq!(categorize(Some("12"), &forum), Some(Category::Ongoing));
        assert_eq!(categorize(None, &forum), Some(Category::Ongoing));
    }

    #[test]
    fn test_excluded_forums_are_never_surfaced() {
        let forum = forum_config();
        assert_eq!(categorize(Some("4"), &forum), None);
        assert_eq!(categorize(Some("90"), &forum), None);
    }

    #[test]
    fn test_db_string_round_trip() {
        for cat in [
            Category::Ongoing,
            Category::Comms,
            Category::Complete,
            Category::Incomplete,
        ] {
            assert_eq!(Category::from_db_string(cat.to_db_string()), Some(cat));
        }
        assert_eq!(Category::from_db_string("archived"), None);
    }
}
