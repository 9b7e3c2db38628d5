mod fs;

pub use fs::{FsObjectStore, MANIFEST_FILE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::checker::ChecksumAlgorithm;
use crate::error::Result;

/// Byte stream handed out by an object store. Dropping it releases the
/// underlying resource, so every exit path of a verification is covered.
pub type ObjectStream = Box<dyn AsyncRead + Send + Unpin>;

/// What the object store knows about one stored object: the digest and
/// algorithm recorded when the bytes were written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_id: Uuid,
    pub expected_checksum: String,
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
}

/// Per-object retrieval failures. These classify into result codes during a
/// pass; they are not fatal errors.
#[derive(Debug, Clone, Error)]
pub enum RetrieveError {
    #[error("object not found in store")]
    NotFound,

    #[error("object unreadable: {0}")]
    Unreadable(String),
}

/// Read-only view of the store that holds the actual bitstream bytes. The
/// store owns the ingest-time digest; the checker only copies it in for
/// comparison.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Ingest-time metadata for one object.
    async fn stat(&self, object_id: Uuid) -> std::result::Result<ObjectRecord, RetrieveError>;

    /// Open the object's byte stream.
    async fn retrieve(&self, object_id: Uuid) -> std::result::Result<ObjectStream, RetrieveError>;

    /// Every object the store knows about, for pre-seeding checker state.
    async fn list(&self) -> Result<Vec<ObjectRecord>>;
}
