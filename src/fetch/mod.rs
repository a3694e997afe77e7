//! HTTP fetching: session state, pacing, retry and rendering fallback
//!
//! - `client` - the cookie-bearing [`FetchClient`] every HTML crawl goes
//!   through: login-on-demand, request spacing, cooldown backoff and the
//!   shared concurrency limiter
//! - `render` - script-executing fallback for pages whose values are
//!   computed client-side
//! - `admin` - the administrative-export client used by dump-sync

pub mod admin;
pub mod client;
pub mod render;

use thiserror::Error;

pub use admin::AdminClient;
pub use client::{AuthState, FetchClient, PageOutcome};

/// Fetch-layer errors
///
/// Network, timeout and cooldown conditions are retried inside the client
/// up to a bounded attempt count before surfacing here; `Auth` is never
/// retried and never silently downgraded to a guest session.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Cooldown page persisted after {attempts} attempts for {url}")]
    Cooldown { url: String, attempts: u32 },

    #[error("Login did not establish a verified session for '{username}'")]
    Auth { username: String },

    #[error("Rendered fetch failed for {url}: {message}")]
    Render { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// True for conditions worth another attempt (timeouts, 5xx, cooldown)
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Cooldown { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Http { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
