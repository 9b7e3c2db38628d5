use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use crate::error::Result;
use crate::store::StateStore;

use super::state::{ChecksumHistory, ChecksumResultCode, MostRecentChecksum};

#[derive(Debug, Clone, Tabled)]
pub struct StateTableRow {
    #[tabled(rename = "Object")]
    pub object: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Expected")]
    pub expected: String,
    #[tabled(rename = "Current")]
    pub current: String,
    #[tabled(rename = "Last checked")]
    pub last_checked: String,
    #[tabled(rename = "Queued")]
    pub queued: String,
}

impl From<&MostRecentChecksum> for StateTableRow {
    fn from(row: &MostRecentChecksum) -> Self {
        StateTableRow {
            object: row.object_id.to_string(),
            result: format!("{} {}", row.result.symbol(), row.result.as_str()),
            expected: truncate_digest(&row.expected_checksum, 16),
            current: row
                .current_checksum
                .as_deref()
                .map(|c| truncate_digest(c, 16))
                .unwrap_or_else(|| "-".to_string()),
            last_checked: row
                .process_end_date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            queued: if row.to_be_processed { "yes" } else { "no" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct HistoryTableRow {
    #[tabled(rename = "Object")]
    pub object: String,
    #[tabled(rename = "Timestamp")]
    pub timestamp: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Expected")]
    pub expected: String,
    #[tabled(rename = "Current")]
    pub current: String,
}

impl From<&ChecksumHistory> for HistoryTableRow {
    fn from(entry: &ChecksumHistory) -> Self {
        HistoryTableRow {
            object: entry.object_id.to_string(),
            timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            result: format!("{} {}", entry.result.symbol(), entry.result.as_str()),
            expected: truncate_digest(&entry.expected_checksum, 16),
            current: entry
                .current_checksum
                .as_deref()
                .map(|c| truncate_digest(c, 16))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn truncate_digest(digest: &str, max_len: usize) -> String {
    if digest.len() <= max_len {
        digest.to_string()
    } else {
        format!("{}…", &digest[..max_len])
    }
}

#[derive(Debug, Serialize)]
pub struct ResultCount {
    pub code: ChecksumResultCode,
    pub description: &'static str,
    pub count: u64,
}

/// Totals across the whole state store.
#[derive(Debug, Serialize)]
pub struct ChecksumSummary {
    pub tracked: u64,
    pub history_entries: u64,
    pub queued: u64,
    pub unaudited: u64,
    pub by_result: Vec<ResultCount>,
}

/// Read-only reporting over the state store.
pub struct Reporter<'a, S> {
    store: &'a S,
}

impl<'a, S: StateStore> Reporter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn by_object(&self, object_id: Uuid) -> Result<Option<MostRecentChecksum>> {
        self.store.find_by_object(object_id).await
    }

    pub async fn all(&self) -> Result<Vec<MostRecentChecksum>> {
        self.store.all().await
    }

    /// Rows whose last pass started in `[start, end)`, ordered by object id.
    pub async fn by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MostRecentChecksum>> {
        self.store.find_in_date_range(start, end).await
    }

    /// History entries for one result code in `[start, end)`, ordered by
    /// object id.
    pub async fn by_result_in_range(
        &self,
        code: ChecksumResultCode,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChecksumHistory>> {
        self.store.history_by_result(code, start, end).await
    }

    /// Tracked objects with no audit history at all. A non-empty result after
    /// a completed pass means a pass updated state without writing history
    /// and should be treated as an operational alert.
    pub async fn unaudited(&self) -> Result<Vec<MostRecentChecksum>> {
        self.store.find_unaudited().await
    }

    pub async fn summary(&self) -> Result<ChecksumSummary> {
        let rows = self.store.all().await?;
        let queued = rows.iter().filter(|r| r.to_be_processed).count() as u64;
        let by_result = ChecksumResultCode::ALL
            .iter()
            .map(|&code| ResultCount {
                code,
                description: code.description(),
                count: rows.iter().filter(|r| r.result == code).count() as u64,
            })
            .collect();

        Ok(ChecksumSummary {
            tracked: rows.len() as u64,
            history_entries: self.store.history_count().await?,
            queued,
            unaudited: self.store.find_unaudited().await?.len() as u64,
            by_result,
        })
    }
}
