//! Memoized entity details.
//!
//! List endpoints return partial records; the full detail set lives at the entity's
//! own resource path and is comparatively expensive. Every entity therefore carries
//! a [`DetailCache`]: the first unknown-field access triggers exactly one detail
//! fetch, after which the cached map is authoritative until explicitly replaced.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use datamonster_core::Result;

use crate::datamonster::DataMonster;

/// A lazily populated detail map.
///
/// Cloning shares the cache, so clones of an entity never re-fetch. The cache is
/// instance-local: two entities obtained from separate listings do not share it.
#[derive(Debug, Clone, Default)]
pub(crate) struct DetailCache {
    state: Arc<Mutex<Option<Map<String, Value>>>>,
}

impl DetailCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A cache pre-populated with details already in hand (by-id lookups).
    pub(crate) fn preloaded(details: Map<String, Value>) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(details))),
        }
    }

    /// Looks up one field, fetching the full detail map from `path` on first use.
    pub(crate) async fn field(
        &self,
        dm: &DataMonster,
        path: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(dm.fetch_details(path).await?);
        }
        Ok(state.as_ref().and_then(|details| details.get(name)).cloned())
    }

    /// Replaces the cached map; later lookups resolve against it without fetching.
    pub(crate) async fn replace(&self, details: Map<String, Value>) {
        *self.state.lock().await = Some(details);
    }
}
