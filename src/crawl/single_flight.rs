//! Single-flight keyed cache
//!
//! Within one orchestration run, several concurrent tasks may want the
//! same resource (the avatar of a poster appearing in many threads). The
//! first requester of a key installs a pending cell and runs the fetch;
//! every other requester awaits that cell instead of issuing its own
//! request. Install is an atomic get-or-insert under one lock, never a
//! check-then-act on shared state.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Keyed single-flight cache; cheap to clone, clones share state
pub struct SingleFlight<K, V> {
    cells: Arc<Mutex<HashMap<K, Arc<OnceCell<V>>>>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            cells: self.cells.clone(),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            cells: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, starting `fetch` only for the
    /// key's first requester; concurrent requesters await the in-flight
    /// fetch instead of racing
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            // The outer lock is held only for the map access, never
            // across the fetch
            let mut cells = match self.cells.lock() {
                Ok(cells) => cells,
                Err(poisoned) => poisoned.into_inner(),
            };
            cells
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(fetch).await.clone()
    }
}
