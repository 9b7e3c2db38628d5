use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::checker::{CheckOutcome, ChecksumHistory, ChecksumResultCode, MostRecentChecksum};
use crate::error::{FixityError, Result};

use super::StateStore;

/// Serializable dump of the full checker state, used to persist the store
/// between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub states: Vec<MostRecentChecksum>,
    pub history: Vec<ChecksumHistory>,
}

#[derive(Default)]
struct Inner {
    states: BTreeMap<Uuid, MostRecentChecksum>,
    history: Vec<ChecksumHistory>,
}

/// In-memory state store. Every trait method runs as one critical section
/// over the shared state, which is what makes claim-and-mark and
/// update-plus-append atomic with respect to concurrent workers.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let states = snapshot
            .states
            .into_iter()
            .map(|s| (s.object_id, s))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                states,
                history: snapshot.history,
            }),
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let inner = self.locked()?;
        Ok(Snapshot {
            states: inner.states.values().cloned().collect(),
            history: inner.history.clone(),
        })
    }

    /// Load a snapshot file; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
            FixityError::Snapshot(format!("invalid snapshot {}: {}", path.display(), e))
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)?;
        debug!(
            "saved snapshot to {} ({} rows, {} history entries)",
            path.display(),
            snapshot.states.len(),
            snapshot.history.len()
        );
        Ok(())
    }

    fn locked(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| FixityError::Store("state store lock poisoned".into()))
    }
}

fn eligible(row: &MostRecentChecksum, cutoff: Option<DateTime<Utc>>) -> bool {
    if !row.to_be_processed {
        return false;
    }
    match cutoff {
        // The cutoff doubles as the in-flight guard: a recently started pass
        // is skipped, while a stale claim left by an interrupted pass is
        // re-admitted once its start falls behind the cutoff.
        Some(cutoff) => row
            .process_start_date
            .map(|start| start < cutoff)
            .unwrap_or(true),
        None => !row.in_flight(),
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn register(&self, record: MostRecentChecksum) -> Result<bool> {
        let mut inner = self.locked()?;
        if inner.states.contains_key(&record.object_id) {
            return Ok(false);
        }
        debug!("registering object {}", record.object_id);
        inner.states.insert(record.object_id, record);
        Ok(true)
    }

    async fn claim_next(
        &self,
        cutoff: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<MostRecentChecksum>> {
        let mut inner = self.locked()?;
        let next = inner
            .states
            .values()
            .filter(|row| eligible(row, cutoff))
            .min_by_key(|row| (row.process_end_date, row.object_id))
            .map(|row| row.object_id);

        let Some(object_id) = next else {
            return Ok(None);
        };
        let row = inner
            .states
            .get_mut(&object_id)
            .ok_or_else(|| FixityError::Store("claimed row vanished".into()))?;
        row.process_start_date = Some(now);
        Ok(Some(row.clone()))
    }

    async fn claim_object(
        &self,
        object_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MostRecentChecksum>> {
        let mut inner = self.locked()?;
        let Some(row) = inner.states.get_mut(&object_id) else {
            return Ok(None);
        };
        if row.in_flight() {
            return Err(FixityError::Store(format!(
                "object {} is already being verified",
                object_id
            )));
        }
        row.process_start_date = Some(now);
        Ok(Some(row.clone()))
    }

    async fn record_outcome(&self, outcome: &CheckOutcome) -> Result<ChecksumHistory> {
        let mut inner = self.locked()?;
        let row = inner
            .states
            .get_mut(&outcome.object_id)
            .ok_or(FixityError::UnknownObject(outcome.object_id))?;
        row.current_checksum = outcome.current_checksum.clone();
        row.result = outcome.result;
        row.process_start_date = Some(outcome.process_start_date);
        row.process_end_date = Some(outcome.process_end_date);
        row.to_be_processed = false;

        let entry = ChecksumHistory {
            object_id: outcome.object_id,
            timestamp: outcome.process_end_date,
            result: outcome.result,
            expected_checksum: outcome.expected_checksum.clone(),
            current_checksum: outcome.current_checksum.clone(),
        };
        inner.history.push(entry.clone());
        Ok(entry)
    }

    async fn find_by_object(&self, object_id: Uuid) -> Result<Option<MostRecentChecksum>> {
        let inner = self.locked()?;
        Ok(inner.states.get(&object_id).cloned())
    }

    async fn all(&self) -> Result<Vec<MostRecentChecksum>> {
        let inner = self.locked()?;
        Ok(inner.states.values().cloned().collect())
    }

    async fn find_in_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MostRecentChecksum>> {
        let inner = self.locked()?;
        Ok(inner
            .states
            .values()
            .filter(|row| {
                row.process_start_date
                    .map(|d| start <= d && d < end)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn history_by_result(
        &self,
        code: ChecksumResultCode,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChecksumHistory>> {
        let inner = self.locked()?;
        let mut entries: Vec<ChecksumHistory> = inner
            .history
            .iter()
            .filter(|e| e.result == code && start <= e.timestamp && e.timestamp < end)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.object_id, e.timestamp));
        Ok(entries)
    }

    async fn history_for_object(&self, object_id: Uuid) -> Result<Vec<ChecksumHistory>> {
        let inner = self.locked()?;
        Ok(inner
            .history
            .iter()
            .filter(|e| e.object_id == object_id)
            .cloned()
            .collect())
    }

    async fn find_unaudited(&self) -> Result<Vec<MostRecentChecksum>> {
        let inner = self.locked()?;
        let audited: BTreeSet<Uuid> = inner.history.iter().map(|e| e.object_id).collect();
        Ok(inner
            .states
            .values()
            .filter(|row| !audited.contains(&row.object_id))
            .cloned()
            .collect())
    }

    async fn requeue_checked_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.locked()?;
        let mut flipped = 0;
        for row in inner.states.values_mut() {
            if row.to_be_processed || row.in_flight() {
                continue;
            }
            if row.process_end_date.map(|end| end < cutoff).unwrap_or(false) {
                row.to_be_processed = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn requeue_all(&self) -> Result<u64> {
        let mut inner = self.locked()?;
        let mut flipped = 0;
        for row in inner.states.values_mut() {
            if !row.to_be_processed && !row.in_flight() {
                row.to_be_processed = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn remove_object(&self, object_id: Uuid, purge_history: bool) -> Result<bool> {
        let mut inner = self.locked()?;
        let removed = inner.states.remove(&object_id).is_some();
        if purge_history {
            inner.history.retain(|e| e.object_id != object_id);
        }
        if removed {
            debug!("removed state for object {}", object_id);
        }
        Ok(removed)
    }

    async fn prune_history(
        &self,
        before: DateTime<Utc>,
        code: Option<ChecksumResultCode>,
    ) -> Result<u64> {
        let mut inner = self.locked()?;
        let before_len = inner.history.len();
        inner.history.retain(|e| {
            let old = e.timestamp < before;
            let matches = code.map(|c| e.result == c).unwrap_or(true);
            !(old && matches)
        });
        Ok((before_len - inner.history.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.locked()?;
        Ok(inner.states.len() as u64)
    }

    async fn history_count(&self) -> Result<u64> {
        let inner = self.locked()?;
        Ok(inner.history.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::ChecksumAlgorithm;
    use chrono::{Duration, TimeZone};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn row(expected: &str) -> MostRecentChecksum {
        MostRecentChecksum::new(Uuid::new_v4(), expected, ChecksumAlgorithm::Sha256)
    }

    fn outcome_for(
        claimed: &MostRecentChecksum,
        result: ChecksumResultCode,
        end: DateTime<Utc>,
    ) -> CheckOutcome {
        CheckOutcome {
            object_id: claimed.object_id,
            result,
            expected_checksum: claimed.expected_checksum.clone(),
            current_checksum: Some("deadbeef".into()),
            process_start_date: claimed.process_start_date.unwrap_or(end),
            process_end_date: end,
        }
    }

    #[tokio::test]
    async fn test_register_is_create_if_absent() {
        let store = MemoryStateStore::new();
        let record = row("abc123");
        let id = record.object_id;

        assert!(store.register(record.clone()).await.unwrap());
        assert!(!store.register(record).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.find_by_object(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_next_prefers_never_checked_rows() {
        let store = MemoryStateStore::new();
        let fresh = row("a");
        let mut checked = row("b");
        checked.process_start_date = Some(ts(1));
        checked.process_end_date = Some(ts(1));

        store.register(checked).await.unwrap();
        store.register(fresh.clone()).await.unwrap();

        let claimed = store.claim_next(None, ts(9)).await.unwrap().unwrap();
        assert_eq!(claimed.object_id, fresh.object_id);
        assert_eq!(claimed.process_start_date, Some(ts(9)));
    }

    #[tokio::test]
    async fn test_claim_next_oldest_end_date_first() {
        let store = MemoryStateStore::new();
        let mut older = row("a");
        older.process_start_date = Some(ts(1));
        older.process_end_date = Some(ts(1));
        let mut newer = row("b");
        newer.process_start_date = Some(ts(5));
        newer.process_end_date = Some(ts(5));

        store.register(newer).await.unwrap();
        store.register(older.clone()).await.unwrap();

        let claimed = store.claim_next(None, ts(9)).await.unwrap().unwrap();
        assert_eq!(claimed.object_id, older.object_id);
    }

    #[tokio::test]
    async fn test_claim_next_ties_broken_by_object_id() {
        let store = MemoryStateStore::new();
        let a = row("a");
        let b = row("b");
        let first_id = a.object_id.min(b.object_id);
        store.register(a).await.unwrap();
        store.register(b).await.unwrap();

        let claimed = store.claim_next(None, ts(9)).await.unwrap().unwrap();
        assert_eq!(claimed.object_id, first_id);
    }

    #[tokio::test]
    async fn test_claimed_row_is_excluded_until_outcome_recorded() {
        let store = MemoryStateStore::new();
        let a = row("a");
        let b = row("b");
        store.register(a.clone()).await.unwrap();
        store.register(b.clone()).await.unwrap();

        let first = store.claim_next(None, ts(9)).await.unwrap().unwrap();
        let second = store.claim_next(None, ts(9)).await.unwrap().unwrap();
        assert_ne!(first.object_id, second.object_id);

        // Both claimed, nothing eligible left.
        assert!(store.claim_next(None, ts(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_next_ignores_completed_rows() {
        let store = MemoryStateStore::new();
        let record = row("a");
        store.register(record.clone()).await.unwrap();

        let claimed = store.claim_next(None, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, ts(2)))
            .await
            .unwrap();

        assert!(store.claim_next(None, ts(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_next_cutoff_skips_recent_starts() {
        let store = MemoryStateStore::new();
        let mut recent = row("a");
        recent.process_start_date = Some(ts(8));
        recent.process_end_date = Some(ts(8));
        store.register(recent).await.unwrap();

        // Started at 08:00, cutoff at 06:00: too recent.
        assert!(store.claim_next(Some(ts(6)), ts(9)).await.unwrap().is_none());
        // Cutoff after the start admits it.
        assert!(store.claim_next(Some(ts(9)), ts(9)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cutoff_readmits_stale_claim() {
        let store = MemoryStateStore::new();
        let record = row("a");
        let id = record.object_id;
        store.register(record).await.unwrap();

        // A pass claimed the row at 01:00 and never committed.
        store.claim_object(id, ts(1)).await.unwrap().unwrap();
        assert!(store.claim_next(None, ts(9)).await.unwrap().is_none());

        // With a cutoff behind the stale start, the row is selectable again.
        let reclaimed = store.claim_next(Some(ts(5)), ts(9)).await.unwrap().unwrap();
        assert_eq!(reclaimed.object_id, id);
    }

    #[tokio::test]
    async fn test_record_outcome_updates_row_and_appends_history() {
        let store = MemoryStateStore::new();
        let record = row("abc123");
        let id = record.object_id;
        store.register(record).await.unwrap();

        let claimed = store.claim_next(None, ts(1)).await.unwrap().unwrap();
        let entry = store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Mismatch, ts(2)))
            .await
            .unwrap();

        assert_eq!(entry.object_id, id);
        assert_eq!(entry.timestamp, ts(2));

        let updated = store.find_by_object(id).await.unwrap().unwrap();
        assert_eq!(updated.result, ChecksumResultCode::Mismatch);
        assert_eq!(updated.process_end_date, Some(ts(2)));
        assert!(!updated.to_be_processed);
        assert!(!updated.in_flight());

        assert_eq!(store.history_for_object(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_outcome_unknown_object_is_fatal() {
        let store = MemoryStateStore::new();
        let orphan = row("a");
        let err = store
            .record_outcome(&outcome_for(&orphan, ChecksumResultCode::Match, ts(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FixityError::UnknownObject(_)));
    }

    #[tokio::test]
    async fn test_claim_object_ignores_eligibility() {
        let store = MemoryStateStore::new();
        let record = row("a");
        let id = record.object_id;
        store.register(record).await.unwrap();

        let claimed = store.claim_next(None, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, ts(2)))
            .await
            .unwrap();

        // Completed and de-queued, but a named claim still works.
        let reclaimed = store.claim_object(id, ts(3)).await.unwrap().unwrap();
        assert_eq!(reclaimed.process_start_date, Some(ts(3)));
    }

    #[tokio::test]
    async fn test_claim_object_in_flight_is_error() {
        let store = MemoryStateStore::new();
        let record = row("a");
        let id = record.object_id;
        store.register(record).await.unwrap();

        store.claim_object(id, ts(1)).await.unwrap().unwrap();
        assert!(store.claim_object(id, ts(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_requeue_checked_before_only_touches_old_completed_rows() {
        let store = MemoryStateStore::new();
        let old = row("a");
        let fresh = row("b");
        store.register(old.clone()).await.unwrap();
        store.register(fresh.clone()).await.unwrap();

        for (id, end) in [(old.object_id, ts(1)), (fresh.object_id, ts(10))] {
            let claimed = store.claim_object(id, end).await.unwrap().unwrap();
            store
                .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, end))
                .await
                .unwrap();
        }

        let flipped = store.requeue_checked_before(ts(5)).await.unwrap();
        assert_eq!(flipped, 1);

        let requeued = store.find_by_object(old.object_id).await.unwrap().unwrap();
        assert!(requeued.to_be_processed);
        let untouched = store.find_by_object(fresh.object_id).await.unwrap().unwrap();
        assert!(!untouched.to_be_processed);
    }

    #[tokio::test]
    async fn test_remove_object_is_idempotent() {
        let store = MemoryStateStore::new();
        let record = row("a");
        let id = record.object_id;
        store.register(record).await.unwrap();

        let claimed = store.claim_object(id, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, ts(1)))
            .await
            .unwrap();

        assert!(store.remove_object(id, true).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.history_count().await.unwrap(), 0);

        // Second call is a no-op, not an error.
        assert!(!store.remove_object(id, true).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_object_can_keep_history() {
        let store = MemoryStateStore::new();
        let record = row("a");
        let id = record.object_id;
        store.register(record).await.unwrap();

        let claimed = store.claim_object(id, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Mismatch, ts(1)))
            .await
            .unwrap();

        assert!(store.remove_object(id, false).await.unwrap());
        assert_eq!(store.history_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_history_by_age_and_code() {
        let store = MemoryStateStore::new();
        let record = row("a");
        let id = record.object_id;
        store.register(record).await.unwrap();

        for (result, end) in [
            (ChecksumResultCode::Match, ts(1)),
            (ChecksumResultCode::Mismatch, ts(2)),
            (ChecksumResultCode::Match, ts(10)),
        ] {
            let claimed = store.claim_object(id, end).await.unwrap().unwrap();
            store
                .record_outcome(&outcome_for(&claimed, result, end))
                .await
                .unwrap();
        }

        // Only old MATCH entries go; the old MISMATCH survives.
        let deleted = store
            .prune_history(ts(5), Some(ChecksumResultCode::Match))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.history_count().await.unwrap(), 2);

        let deleted = store.prune_history(ts(5), None).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.history_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_unaudited_flags_rows_without_history() {
        let store = MemoryStateStore::new();
        let audited = row("a");
        let gap = row("b");
        store.register(audited.clone()).await.unwrap();
        store.register(gap.clone()).await.unwrap();

        let claimed = store.claim_object(audited.object_id, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, ts(1)))
            .await
            .unwrap();

        let unaudited = store.find_unaudited().await.unwrap();
        assert_eq!(unaudited.len(), 1);
        assert_eq!(unaudited[0].object_id, gap.object_id);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = MemoryStateStore::new();
        let record = row("abc123");
        let id = record.object_id;
        store.register(record).await.unwrap();
        let claimed = store.claim_object(id, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, ts(2)))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        store.save(&path).unwrap();

        let reloaded = MemoryStateStore::load(&path).unwrap();
        assert_eq!(reloaded.count().await.unwrap(), 1);
        assert_eq!(reloaded.history_count().await.unwrap(), 1);
        let restored = reloaded.find_by_object(id).await.unwrap().unwrap();
        assert_eq!(restored.result, ChecksumResultCode::Match);
        assert_eq!(restored.process_end_date, Some(ts(2)));
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStateStore::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requeue_after_pass_allows_reauditing() {
        let store = MemoryStateStore::new();
        let record = row("a");
        store.register(record).await.unwrap();

        let claimed = store.claim_next(None, ts(1)).await.unwrap().unwrap();
        store
            .record_outcome(&outcome_for(&claimed, ChecksumResultCode::Match, ts(1)))
            .await
            .unwrap();
        assert!(store.claim_next(None, ts(2)).await.unwrap().is_none());

        assert_eq!(store.requeue_all().await.unwrap(), 1);
        assert!(store.claim_next(None, ts(2) + Duration::minutes(1)).await.unwrap().is_some());
    }
}
