mod digest;
mod report;
mod retention;
mod runner;
mod state;
mod verifier;

pub use digest::{digest_bytes, digest_reader, StreamingDigest};
pub use report::{ChecksumSummary, HistoryTableRow, Reporter, ResultCount, StateTableRow};
pub use retention::{HistoryRetention, Retention};
pub use runner::{PassBudget, PassReport, Runner};
pub use state::{
    CheckOutcome, ChecksumAlgorithm, ChecksumHistory, ChecksumResultCode, MostRecentChecksum,
};
pub use verifier::Verifier;
