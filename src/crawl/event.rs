//! Inbound event resolution
//!
//! Webhook events carry an event name plus whichever ids the origin site
//! had on hand. Both the event kind and the resolved action are closed
//! enums, so the resolution table is an exhaustive match and an unhandled
//! combination is a compile-time-visible gap rather than a silent no-op.

/// Kind of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ProfileEdit,
    NewPost,
    NewTopic,
    /// Anything the resolution table does not act on
    Other,
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "profile_edit" => EventKind::ProfileEdit,
            "new_post" => EventKind::NewPost,
            "new_topic" => EventKind::NewTopic,
            _ => EventKind::Other,
        }
    }
}

/// An inbound event as received by the webhook surface
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event: EventKind,
    pub thread_id: Option<String>,
    pub forum_id: Option<String>,
    pub user_id: Option<String>,
}

/// The action an event resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
    /// Re-crawl one character's profile
    ProfileCrawl { character_id: String },
    /// Targeted re-crawl of a single thread
    ThreadRecrawl {
        thread_id: String,
        forum_id: Option<String>,
        user_id: Option<String>,
    },
    /// Full thread crawl for a character (no thread id was supplied)
    FullThreadCrawl { character_id: String },
    /// Accepted, nothing to do
    None,
}

impl ResolvedAction {
    /// The action name echoed back to the event submitter
    pub fn name(&self) -> &'static str {
        match self {
            ResolvedAction::ProfileCrawl { .. } => "profile_crawl",
            ResolvedAction::ThreadRecrawl { .. } => "thread_recrawl",
            ResolvedAction::FullThreadCrawl { .. } => "full_thread_crawl",
            ResolvedAction::None => "none",
        }
    }
}

/// Resolves an inbound event to an action
pub fn resolve_event(event: &InboundEvent) -> ResolvedAction {
    match event.event {
        EventKind::ProfileEdit => match &event.user_id {
            Some(user_id) => ResolvedAction::ProfileCrawl {
                character_id: user_id.clone(),
            },
            None => ResolvedAction::None,
        },
        EventKind::NewPost | EventKind::NewTopic => match (&event.thread_id, &event.user_id) {
            (Some(thread_id), _) => ResolvedAction::ThreadRecrawl {
                thread_id: thread_id.clone(),
                forum_id: event.forum_id.clone(),
                user_id: event.user_id.clone(),
            },
            (None, Some(user_id)) => ResolvedAction::FullThreadCrawl {
                character_id: user_id.clone(),
            },
            (None, None) => ResolvedAction::None,
        },
        EventKind::Other => ResolvedAction::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(
        name: &str,
        thread_id: Option<&str>,
        forum_id: Option<&str>,
        user_id: Option<&str>,
    ) -> InboundEvent {
        InboundEvent {
            event: EventKind::parse(name),
            thread_id: thread_id.map(str::to_string),
            forum_id: forum_id.map(str::to_string),
            user_id: user_id.map(str::to_string),
        }
    }

    #[test]
    fn test_profile_edit_with_user() {
        let action = resolve_event(&event("profile_edit", None, None, Some("42")));
        assert_eq!(
            action,
            ResolvedAction::ProfileCrawl {
                character_id: "42".to_string()
            }
        );
        assert_eq!(action.name(), "profile_crawl");
    }

    #[test]
    fn test_new_post_with_thread() {
        let action = resolve_event(&event("new_post", Some("789"), Some("30"), None));
        assert_eq!(
            action,
            ResolvedAction::ThreadRecrawl {
                thread_id: "789".to_string(),
                forum_id: Some("30".to_string()),
                user_id: None,
            }
        );
        assert_eq!(action.name(), "thread_recrawl");
    }

    #[test]
    fn test_new_topic_user_only() {
        let action = resolve_event(&event("new_topic", None, None, Some("42")));
        assert_eq!(
            action,
            ResolvedAction::FullThreadCrawl {
                character_id: "42".to_string()
            }
        );
        assert_eq!(action.name(), "full_thread_crawl");
    }

    #[test]
    fn test_new_post_without_ids() {
        let action = resolve_event(&event("new_post", None, None, None));
        assert_eq!(action, ResolvedAction::None);
        assert_eq!(action.name(), "none");
    }

    #[test]
    fn test_unknown_event_accepted_without_action() {
        let action = resolve_event(&event("member_banned", None, None, Some("42")));
        assert_eq!(action, ResolvedAction::None);
    }

    #[test]
    fn test_profile_edit_without_user_is_none() {
        let action = resolve_event(&event("profile_edit", Some("789"), None, None));
        assert_eq!(action, ResolvedAction::None);
    }
}
