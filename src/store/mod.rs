mod memory;

pub use memory::{MemoryStateStore, Snapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::checker::{CheckOutcome, ChecksumHistory, ChecksumResultCode, MostRecentChecksum};
use crate::error::Result;

/// Transactional repository for checker state: one current-state row per
/// tracked object plus the append-only audit history. Claiming a row and
/// committing an outcome are each a single atomic unit, so two concurrent
/// workers never verify the same object in the same pass.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the current-state row for an object if none exists yet.
    /// Returns true when a row was created.
    async fn register(&self, record: MostRecentChecksum) -> Result<bool>;

    /// Atomically select and claim the next record to verify: among eligible
    /// rows with `to_be_processed` set, the one with the oldest
    /// `process_end_date` (never-checked rows first), ties broken by
    /// ascending object id. Without a cutoff, rows with a pass in flight are
    /// excluded; with a cutoff, rows whose previous pass started at or after
    /// the cutoff are skipped instead, which re-admits stale claims left by
    /// an interrupted pass. `None` means the pass is complete.
    async fn claim_next(
        &self,
        cutoff: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<MostRecentChecksum>>;

    /// Claim one named row regardless of scheduling eligibility. `None` when
    /// no state row exists for the object.
    async fn claim_object(
        &self,
        object_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MostRecentChecksum>>;

    /// Commit a completed verification: update the current-state row and
    /// append exactly one history entry, in one transaction.
    async fn record_outcome(&self, outcome: &CheckOutcome) -> Result<ChecksumHistory>;

    async fn find_by_object(&self, object_id: Uuid) -> Result<Option<MostRecentChecksum>>;

    /// All current-state rows, ordered by object id.
    async fn all(&self) -> Result<Vec<MostRecentChecksum>>;

    /// Rows whose `process_start_date` falls in the half-open interval
    /// `[start, end)`, ordered by object id.
    async fn find_in_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MostRecentChecksum>>;

    /// History entries with the given result code and timestamp in
    /// `[start, end)`, ordered by object id.
    async fn history_by_result(
        &self,
        code: ChecksumResultCode,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChecksumHistory>>;

    async fn history_for_object(&self, object_id: Uuid) -> Result<Vec<ChecksumHistory>>;

    /// Current-state rows with no history entry at all. Non-empty after a
    /// completed pass indicates an instrumentation gap.
    async fn find_unaudited(&self) -> Result<Vec<MostRecentChecksum>>;

    /// Re-queue completed rows whose last check ended before the cutoff.
    /// Returns the number of rows flipped back to eligible.
    async fn requeue_checked_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Re-queue every completed row. Returns the number flipped.
    async fn requeue_all(&self) -> Result<u64>;

    /// Delete the state row for a permanently removed object, cascading to
    /// its history when `purge_history` is set. Idempotent: returns false
    /// when no row existed.
    async fn remove_object(&self, object_id: Uuid, purge_history: bool) -> Result<bool>;

    /// Delete history entries older than `before`, optionally only those with
    /// a given result code. Returns the number deleted.
    async fn prune_history(
        &self,
        before: DateTime<Utc>,
        code: Option<ChecksumResultCode>,
    ) -> Result<u64>;

    async fn count(&self) -> Result<u64>;

    async fn history_count(&self) -> Result<u64>;
}
