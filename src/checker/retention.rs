use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::store::StateStore;

use super::state::ChecksumResultCode;

/// What happens to an object's audit history when the object itself is
/// permanently removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryRetention {
    /// Delete history rows together with the current-state row.
    #[default]
    Purge,
    /// Keep history rows for post-mortem reporting.
    Keep,
}

/// Cleanup operations for objects that no longer exist in the object store.
pub struct Retention<'a, S> {
    store: &'a S,
}

impl<'a, S: StateStore> Retention<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Remove the state row for a permanently deleted object. Idempotent:
    /// removing an unknown object is a no-op and returns false.
    pub async fn remove_object(&self, object_id: Uuid, policy: HistoryRetention) -> Result<bool> {
        let purge = policy == HistoryRetention::Purge;
        let removed = self.store.remove_object(object_id, purge).await?;
        if removed {
            info!(
                "removed checker state for object {} (history {})",
                object_id,
                if purge { "purged" } else { "kept" }
            );
        }
        Ok(removed)
    }

    /// Delete audit history older than `before`, optionally only entries with
    /// one result code. Returns the number of entries deleted.
    pub async fn prune_history(
        &self,
        before: DateTime<Utc>,
        code: Option<ChecksumResultCode>,
    ) -> Result<u64> {
        let deleted = self.store.prune_history(before, code).await?;
        if deleted > 0 {
            info!("pruned {} audit history entries", deleted);
        }
        Ok(deleted)
    }
}
