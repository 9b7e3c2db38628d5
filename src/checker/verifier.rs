use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FixityError, Result};
use crate::objects::{ObjectStore, RetrieveError};
use crate::store::StateStore;

use super::digest::digest_reader;
use super::state::{CheckOutcome, ChecksumHistory, ChecksumResultCode, MostRecentChecksum};

/// Verifies one object at a time: stream the stored bytes through the digest
/// algorithm recorded for the object, classify the outcome, and commit the
/// updated state plus one history entry.
///
/// Missing or unreadable objects and digest mismatches are recorded outcomes
/// of a normal pass. Only state store failures propagate as errors.
pub struct Verifier<S, O> {
    store: Arc<S>,
    objects: Arc<O>,
}

impl<S, O> Verifier<S, O>
where
    S: StateStore,
    O: ObjectStore,
{
    pub fn new(store: Arc<S>, objects: Arc<O>) -> Self {
        Self { store, objects }
    }

    /// Verify a row already claimed in the state store and commit the result.
    pub async fn verify_claimed(&self, claimed: &MostRecentChecksum) -> Result<ChecksumHistory> {
        let started = claimed.process_start_date.unwrap_or_else(Utc::now);
        let (result, current_checksum) = self.compute(claimed).await;

        match result {
            ChecksumResultCode::Match => {
                debug!("object {}: checksum match", claimed.object_id);
            }
            code => {
                warn!("object {}: {}", claimed.object_id, code.description());
            }
        }

        let outcome = CheckOutcome {
            object_id: claimed.object_id,
            result,
            expected_checksum: claimed.expected_checksum.clone(),
            current_checksum,
            process_start_date: started,
            process_end_date: Utc::now(),
        };
        self.store.record_outcome(&outcome).await
    }

    /// Verify one named object regardless of scheduling eligibility,
    /// registering it on first encounter.
    pub async fn verify_object(&self, object_id: Uuid) -> Result<ChecksumHistory> {
        if self.store.find_by_object(object_id).await?.is_none() {
            let record = match self.objects.stat(object_id).await {
                Ok(r) => MostRecentChecksum::new(r.object_id, r.expected_checksum, r.algorithm),
                Err(RetrieveError::NotFound) => return Err(FixityError::UnknownObject(object_id)),
                Err(RetrieveError::Unreadable(reason)) => {
                    return Err(FixityError::Objects(reason))
                }
            };
            self.store.register(record).await?;
        }

        let claimed = self
            .store
            .claim_object(object_id, Utc::now())
            .await?
            .ok_or(FixityError::UnknownObject(object_id))?;
        self.verify_claimed(&claimed).await
    }

    async fn compute(&self, row: &MostRecentChecksum) -> (ChecksumResultCode, Option<String>) {
        let mut stream = match self.objects.retrieve(row.object_id).await {
            Ok(stream) => stream,
            Err(RetrieveError::NotFound) => return (ChecksumResultCode::NotFound, None),
            Err(RetrieveError::Unreadable(reason)) => {
                warn!("object {}: {}", row.object_id, reason);
                return (ChecksumResultCode::StoreError, None);
            }
        };

        match digest_reader(row.algorithm, &mut stream).await {
            Ok(digest) => {
                let result = if digest.eq_ignore_ascii_case(&row.expected_checksum) {
                    ChecksumResultCode::Match
                } else {
                    ChecksumResultCode::Mismatch
                };
                (result, Some(digest))
            }
            Err(e) => {
                warn!("object {}: read failed mid-stream: {}", row.object_id, e);
                (ChecksumResultCode::StoreError, None)
            }
        }
        // The stream is dropped here on every path, releasing the object.
    }
}
