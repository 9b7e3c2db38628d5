use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::{FixityError, Result};
use crate::objects::ObjectStore;
use crate::store::StateStore;

use super::state::{ChecksumHistory, ChecksumResultCode, MostRecentChecksum};
use super::verifier::Verifier;

/// Limits on one scheduling pass. The budget controls when the pass stops
/// claiming new work; a verification already in flight always finishes and
/// commits its result.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassBudget {
    pub max_checks: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl PassBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Tally of one scheduling pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub checked: u64,
    pub matches: u64,
    pub mismatches: u64,
    pub not_found: u64,
    pub store_errors: u64,
    /// History entries for every non-match outcome, for operator attention.
    pub findings: Vec<ChecksumHistory>,
}

impl PassReport {
    fn tally(&mut self, entry: ChecksumHistory) {
        self.checked += 1;
        match entry.result {
            ChecksumResultCode::Match => self.matches += 1,
            ChecksumResultCode::Mismatch => self.mismatches += 1,
            ChecksumResultCode::NotFound => self.not_found += 1,
            ChecksumResultCode::StoreError => self.store_errors += 1,
            ChecksumResultCode::NotYetProcessed => {}
        }
        if entry.result.is_finding() {
            self.findings.push(entry);
        }
    }

    fn merge(&mut self, other: PassReport) {
        self.checked += other.checked;
        self.matches += other.matches;
        self.mismatches += other.mismatches;
        self.not_found += other.not_found;
        self.store_errors += other.store_errors;
        self.findings.extend(other.findings);
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Drives scheduling passes: repeatedly claim the oldest eligible record,
/// verify it, and commit, until no eligible work remains or the budget is
/// exhausted.
pub struct Runner<S, O> {
    store: Arc<S>,
    objects: Arc<O>,
}

impl<S, O> Runner<S, O>
where
    S: StateStore + 'static,
    O: ObjectStore + 'static,
{
    pub fn new(store: Arc<S>, objects: Arc<O>) -> Self {
        Self { store, objects }
    }

    /// Register a state row for every object the store lists that has none
    /// yet. Returns the number of rows created.
    pub async fn sync_from_objects(&self) -> Result<u64> {
        let mut created = 0;
        for record in self.objects.list().await? {
            let row =
                MostRecentChecksum::new(record.object_id, record.expected_checksum, record.algorithm);
            if self.store.register(row).await? {
                created += 1;
            }
        }
        if created > 0 {
            info!("registered {} new objects for auditing", created);
        }
        Ok(created)
    }

    /// Re-queue rows whose last completed check is older than `age`.
    pub async fn requeue_older_than(&self, age: Duration) -> Result<u64> {
        let flipped = self.store.requeue_checked_before(Utc::now() - age).await?;
        if flipped > 0 {
            info!("re-queued {} records for re-auditing", flipped);
        }
        Ok(flipped)
    }

    /// One sequential scheduling pass.
    pub async fn run_pass(
        &self,
        budget: PassBudget,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<PassReport> {
        let verifier = Verifier::new(self.store.clone(), self.objects.clone());
        let deadline = budget.max_duration.map(|d| Utc::now() + d);
        let mut report = PassReport::default();

        loop {
            if let Some(max) = budget.max_checks {
                if report.checked >= max {
                    info!("pass stopped: check budget of {} exhausted", max);
                    break;
                }
            }
            if let Some(deadline) = deadline {
                if Utc::now() >= deadline {
                    info!("pass stopped: time budget exhausted");
                    break;
                }
            }
            let claimed = match self.store.claim_next(cutoff, Utc::now()).await? {
                Some(claimed) => claimed,
                None => break,
            };
            let entry = verifier.verify_claimed(&claimed).await?;
            report.tally(entry);
        }

        info!(
            "pass complete: {} checked, {} match, {} mismatch, {} not found, {} store errors",
            report.checked, report.matches, report.mismatches, report.not_found, report.store_errors
        );
        Ok(report)
    }

    /// One scheduling pass with a bounded pool of verification workers.
    /// Claiming is atomic in the state store, so workers never race onto the
    /// same record; each worker drains claims until none remain or the shared
    /// budget runs out.
    pub async fn run_pass_concurrent(
        &self,
        workers: usize,
        budget: PassBudget,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<PassReport> {
        if workers <= 1 {
            return self.run_pass(budget, cutoff).await;
        }

        let claimed_total = Arc::new(AtomicU64::new(0));
        let deadline = budget.max_duration.map(|d| Utc::now() + d);
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let store = Arc::clone(&self.store);
            let objects = Arc::clone(&self.objects);
            let claimed_total = Arc::clone(&claimed_total);

            handles.push(tokio::spawn(async move {
                let verifier = Verifier::new(Arc::clone(&store), objects);
                let mut report = PassReport::default();
                loop {
                    if let Some(max) = budget.max_checks {
                        if claimed_total.fetch_add(1, Ordering::SeqCst) >= max {
                            break;
                        }
                    }
                    if let Some(deadline) = deadline {
                        if Utc::now() >= deadline {
                            break;
                        }
                    }
                    let claimed = match store.claim_next(cutoff, Utc::now()).await? {
                        Some(claimed) => claimed,
                        None => break,
                    };
                    let entry = verifier.verify_claimed(&claimed).await?;
                    report.tally(entry);
                }
                Ok::<PassReport, FixityError>(report)
            }));
        }

        // Join every worker before reporting, so no verification is left
        // half-committed even when one worker fails.
        let mut merged = PassReport::default();
        let mut fatal = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(worker_report)) => merged.merge(worker_report),
                Ok(Err(e)) => {
                    warn!("verification worker failed: {}", e);
                    fatal = Some(e);
                }
                Err(e) => {
                    fatal = Some(FixityError::Store(format!("worker panicked: {}", e)));
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => {
                info!(
                    "pass complete: {} checked, {} match, {} mismatch, {} not found, {} store errors",
                    merged.checked, merged.matches, merged.mismatches, merged.not_found,
                    merged.store_errors
                );
                Ok(merged)
            }
        }
    }

    /// Process-all mode: re-queue every completed record first, then run a
    /// pass with no cutoff until the selector is empty.
    pub async fn run_all(&self, workers: usize, budget: PassBudget) -> Result<PassReport> {
        self.store.requeue_all().await?;
        self.run_pass_concurrent(workers, budget, None).await
    }
}
