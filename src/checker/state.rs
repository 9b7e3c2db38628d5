use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FixityError;

/// Outcome classification of a verification pass. Closed set; the description
/// text is reference data for reports and carries no logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecksumResultCode {
    Match,
    Mismatch,
    NotFound,
    StoreError,
    NotYetProcessed,
}

impl ChecksumResultCode {
    pub const ALL: [ChecksumResultCode; 5] = [
        ChecksumResultCode::Match,
        ChecksumResultCode::Mismatch,
        ChecksumResultCode::NotFound,
        ChecksumResultCode::StoreError,
        ChecksumResultCode::NotYetProcessed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumResultCode::Match => "MATCH",
            ChecksumResultCode::Mismatch => "MISMATCH",
            ChecksumResultCode::NotFound => "NOT_FOUND",
            ChecksumResultCode::StoreError => "STORE_ERROR",
            ChecksumResultCode::NotYetProcessed => "NOT_YET_PROCESSED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ChecksumResultCode::Match => "Computed checksum matched the value recorded at ingest",
            ChecksumResultCode::Mismatch => "Computed checksum differed from the value recorded at ingest",
            ChecksumResultCode::NotFound => "Object is missing from the object store",
            ChecksumResultCode::StoreError => "Object could not be read from the object store",
            ChecksumResultCode::NotYetProcessed => "Object is registered but has not been verified yet",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ChecksumResultCode::Match => "✓",
            ChecksumResultCode::Mismatch => "✗",
            ChecksumResultCode::NotFound => "?",
            ChecksumResultCode::StoreError => "⚠",
            ChecksumResultCode::NotYetProcessed => "○",
        }
    }

    /// A finding needs operator attention; a match or a fresh registration
    /// does not.
    pub fn is_finding(&self) -> bool {
        matches!(
            self,
            ChecksumResultCode::Mismatch
                | ChecksumResultCode::NotFound
                | ChecksumResultCode::StoreError
        )
    }
}

impl fmt::Display for ChecksumResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumResultCode {
    type Err = FixityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| FixityError::ResultCode(s.to_string()))
    }
}

/// Digest algorithm recorded for an object at ingest time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "SHA-256",
            ChecksumAlgorithm::Sha512 => "SHA-512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = FixityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "").to_ascii_uppercase();
        match normalized.as_str() {
            "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            "SHA512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(FixityError::Algorithm(s.to_string())),
        }
    }
}

/// Current verification state of one tracked object. One row per object for
/// the object's lifetime; mutated only when a pass claims the row and commits
/// its outcome, or when the object is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MostRecentChecksum {
    pub object_id: Uuid,
    pub expected_checksum: String,
    pub current_checksum: Option<String>,
    pub algorithm: ChecksumAlgorithm,
    pub result: ChecksumResultCode,
    pub process_start_date: Option<DateTime<Utc>>,
    pub process_end_date: Option<DateTime<Utc>>,
    pub to_be_processed: bool,
}

impl MostRecentChecksum {
    pub fn new(
        object_id: Uuid,
        expected_checksum: impl Into<String>,
        algorithm: ChecksumAlgorithm,
    ) -> Self {
        Self {
            object_id,
            expected_checksum: expected_checksum.into(),
            current_checksum: None,
            algorithm,
            result: ChecksumResultCode::NotYetProcessed,
            process_start_date: None,
            process_end_date: None,
            to_be_processed: true,
        }
    }

    /// A claimed row is in flight until its outcome is recorded: the start of
    /// the current pass is set, but no end at or after it exists yet.
    pub fn in_flight(&self) -> bool {
        match (self.process_start_date, self.process_end_date) {
            (Some(start), Some(end)) => end < start,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn checked(&self) -> bool {
        self.process_end_date.is_some() && !self.in_flight()
    }
}

/// One append-only audit log entry, written exactly once per completed
/// verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumHistory {
    pub object_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub result: ChecksumResultCode,
    pub expected_checksum: String,
    pub current_checksum: Option<String>,
}

/// Result of one verification pass over one object, ready to be committed as
/// a state update plus a history entry.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub object_id: Uuid,
    pub result: ChecksumResultCode,
    pub expected_checksum: String,
    pub current_checksum: Option<String>,
    pub process_start_date: DateTime<Utc>,
    pub process_end_date: DateTime<Utc>,
}
