//! Process-wide "what is currently crawling" indicator
//!
//! One intentional piece of shared status: the orchestrator is the only
//! writer, external collaborators (the API layer) are read-only
//! consumers. Ephemeral by design; it resets on restart.

use crate::crawl::CrawlKind;
use chrono::Utc;
use std::sync::{Arc, RwLock};

/// A snapshot of the crawl in progress
#[derive(Debug, Clone)]
pub struct Activity {
    pub kind: CrawlKind,
    pub label: String,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub started_at: String,
}

/// Shared status cell; cloning yields another handle to the same cell
#[derive(Clone, Default)]
pub struct ActivityIndicator {
    state: Arc<RwLock<Option<Activity>>>,
}

impl ActivityIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current activity, replacing any previous one
    pub fn set(
        &self,
        kind: CrawlKind,
        label: impl Into<String>,
        character_id: Option<&str>,
        character_name: Option<&str>,
    ) {
        let activity = Activity {
            kind,
            label: label.into(),
            character_id: character_id.map(str::to_string),
            character_name: character_name.map(str::to_string),
            started_at: Utc::now().to_rfc3339(),
        };
        if let Ok(mut state) = self.state.write() {
            *state = Some(activity);
        }
    }

    /// Marks the process idle
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = None;
        }
    }

    /// Returns the current activity, or `None` when idle
    pub fn snapshot(&self) -> Option<Activity> {
        self.state.read().ok().and_then(|state| state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let indicator = ActivityIndicator::new();
        assert!(indicator.snapshot().is_none());

        indicator.set(
            CrawlKind::Profile,
            "Crawling profile",
            Some("42"),
            Some("Scarlet Vane"),
        );
        let activity = indicator.snapshot().unwrap();
        assert_eq!(activity.kind, CrawlKind::Profile);
        assert_eq!(activity.character_id.as_deref(), Some("42"));

        indicator.clear();
        assert!(indicator.snapshot().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let indicator = ActivityIndicator::new();
        let reader = indicator.clone();

        indicator.set(CrawlKind::Discovery, "Discovering", None, None);
        assert!(reader.snapshot().is_some());
    }
}
