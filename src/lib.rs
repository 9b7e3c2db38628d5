pub mod checker;
pub mod error;
pub mod objects;
pub mod store;

pub use error::{FixityError, Result};
pub use checker::{CheckOutcome, ChecksumAlgorithm, ChecksumHistory, ChecksumResultCode, MostRecentChecksum};
pub use checker::{digest_bytes, digest_reader, StreamingDigest};
pub use checker::{ChecksumSummary, HistoryTableRow, Reporter, ResultCount, StateTableRow};
pub use checker::{HistoryRetention, PassBudget, PassReport, Retention, Runner, Verifier};
pub use objects::{FsObjectStore, ObjectRecord, ObjectStore, ObjectStream, RetrieveError, MANIFEST_FILE};
pub use store::{MemoryStateStore, Snapshot, StateStore};
