//! Crawl orchestration
//!
//! Composes the fetch client, parsers and store into the five crawl
//! operations, plus the event-trigger resolution used by the webhook
//! surface, the process-wide activity indicator, and the single-flight
//! cache that keeps concurrent tasks from issuing redundant fetches.

pub mod activity;
pub mod event;
pub mod orchestrator;
pub mod single_flight;

pub use activity::{Activity, ActivityIndicator};
pub use event::{resolve_event, EventKind, InboundEvent, ResolvedAction};
pub use orchestrator::{CrawlReport, Orchestrator};
pub use single_flight::SingleFlight;

/// The five independently invokable crawl operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlKind {
    /// Profile crawl: fields, avatar and power grid for one character or all
    Profile,
    /// Thread crawl: search-driven thread discovery for one character or all
    Threads,
    /// Quote crawl: batch quote extraction over unscraped threads
    Quotes,
    /// Discovery crawl: member-list walk registering unknown characters
    Discovery,
    /// Dump-sync crawl: administrative export reconciliation
    DumpSync,
}

impl CrawlKind {
    /// All crawl kinds, in trigger-surface order
    pub const ALL: [CrawlKind; 5] = [
        CrawlKind::Profile,
        CrawlKind::Threads,
        CrawlKind::Quotes,
        CrawlKind::Discovery,
        CrawlKind::DumpSync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CrawlKind::Profile => "profile",
            CrawlKind::Threads => "threads",
            CrawlKind::Quotes => "quotes",
            CrawlKind::Discovery => "discovery",
            CrawlKind::DumpSync => "dump-sync",
        }
    }

    /// Parses a trigger-surface crawl type name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(CrawlKind::Profile),
            "threads" => Some(CrawlKind::Threads),
            "quotes" => Some(CrawlKind::Quotes),
            "discovery" | "discover" => Some(CrawlKind::Discovery),
            "dump-sync" => Some(CrawlKind::DumpSync),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrawlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for kind in CrawlKind::ALL {
            assert_eq!(CrawlKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CrawlKind::parse("everything"), None);
    }
}
