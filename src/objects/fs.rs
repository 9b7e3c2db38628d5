use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FixityError, Result};

use super::{ObjectRecord, ObjectStore, ObjectStream, RetrieveError};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Filesystem-backed object store: one payload file per object named by its
/// id, described by a JSON manifest of ingest-time digests at the store root.
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    manifest: BTreeMap<Uuid, ObjectRecord>,
}

impl FsObjectStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest_path = root.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
            FixityError::Objects(format!("cannot read {}: {}", manifest_path.display(), e))
        })?;
        let records: Vec<ObjectRecord> = serde_json::from_str(&raw).map_err(|e| {
            FixityError::Objects(format!("invalid manifest {}: {}", manifest_path.display(), e))
        })?;
        let manifest: BTreeMap<Uuid, ObjectRecord> =
            records.into_iter().map(|r| (r.object_id, r)).collect();
        debug!("opened object store at {} ({} objects)", root.display(), manifest.len());
        Ok(Self { root, manifest })
    }

    /// Write a manifest for the given records, creating the root directory if
    /// needed.
    pub fn write_manifest(root: &Path, records: &[ObjectRecord]) -> Result<()> {
        std::fs::create_dir_all(root)?;
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(root.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    pub fn object_path(&self, object_id: Uuid) -> PathBuf {
        self.root.join(object_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn stat(&self, object_id: Uuid) -> std::result::Result<ObjectRecord, RetrieveError> {
        self.manifest
            .get(&object_id)
            .cloned()
            .ok_or(RetrieveError::NotFound)
    }

    async fn retrieve(&self, object_id: Uuid) -> std::result::Result<ObjectStream, RetrieveError> {
        if !self.manifest.contains_key(&object_id) {
            return Err(RetrieveError::NotFound);
        }
        let path = self.object_path(object_id);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file) as ObjectStream),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RetrieveError::NotFound),
            Err(e) => Err(RetrieveError::Unreadable(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<ObjectRecord>> {
        Ok(self.manifest.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{digest_bytes, ChecksumAlgorithm};
    use tokio::io::AsyncReadExt;

    fn seed_store(objects: &[(Uuid, &[u8])]) -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<ObjectRecord> = objects
            .iter()
            .map(|(id, content)| ObjectRecord {
                object_id: *id,
                expected_checksum: digest_bytes(ChecksumAlgorithm::Sha256, content),
                algorithm: ChecksumAlgorithm::Sha256,
            })
            .collect();
        FsObjectStore::write_manifest(dir.path(), &records).unwrap();
        for (id, content) in objects {
            std::fs::write(dir.path().join(id.to_string()), content).unwrap();
        }
        let store = FsObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_without_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsObjectStore::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("manifest.json"));
    }

    #[tokio::test]
    async fn test_stat_unknown_object_is_not_found() {
        let (_dir, store) = seed_store(&[]);
        assert!(matches!(
            store.stat(Uuid::new_v4()).await,
            Err(RetrieveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_retrieve_streams_payload() {
        let id = Uuid::new_v4();
        let (_dir, store) = seed_store(&[(id, b"payload bytes")]);

        let mut stream = store.retrieve(id).await.unwrap();
        let mut content = Vec::new();
        stream.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"payload bytes");
    }

    #[tokio::test]
    async fn test_retrieve_missing_payload_is_not_found() {
        let id = Uuid::new_v4();
        let (dir, store) = seed_store(&[(id, b"payload")]);
        std::fs::remove_file(dir.path().join(id.to_string())).unwrap();

        assert!(matches!(
            store.retrieve(id).await,
            Err(RetrieveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_returns_manifest_records() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (_dir, store) = seed_store(&[(a, b"one"), (b, b"two")]);

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.object_id == a));
        assert!(records.iter().any(|r| r.object_id == b));
    }

    #[test]
    fn test_manifest_defaults_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let json = format!(
            r#"[{{"object_id": "{}", "expected_checksum": "abc123"}}]"#,
            id
        );
        std::fs::write(dir.path().join(MANIFEST_FILE), json).unwrap();

        let store = FsObjectStore::open(dir.path()).unwrap();
        let record = store.manifest.get(&id).unwrap();
        assert_eq!(record.algorithm, ChecksumAlgorithm::Sha256);
    }
}
