//! Blob storage boundary for change-set payloads.
//!
//! Change-set blobs are written outside of any ledger transaction; the
//! ledger record only lands after the blob is safely stored, and a failed
//! ledger write deletes the just-written blob so nothing is left
//! referenced nowhere.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use strata_common::{StrataError, StrataResult};

/// Locates one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    /// Storage bucket (or directory) name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

/// Where change-set payloads live.
///
/// Implementations must make `put` atomic: a blob either appears complete
/// under its key or not at all, and any staging resource is cleaned up on
/// both success and failure paths.
pub trait BlobStore: Send + Sync {
    /// Stores a payload under a fresh key, returning its reference.
    fn put(&self, payload: &[u8]) -> StrataResult<BlobRef>;

    /// Reads a payload back.
    fn get(&self, blob: &BlobRef) -> StrataResult<Bytes>;

    /// Deletes a payload. Deleting a missing blob is not an error.
    fn delete(&self, blob: &BlobRef) -> StrataResult<()>;
}

fn fresh_key() -> String {
    format!("{}.csv.gz", Uuid::new_v4())
}

/// In-memory blob store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    bucket: String,
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    /// Creates an empty store with the given bucket name.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, payload: &[u8]) -> StrataResult<BlobRef> {
        let key = fresh_key();
        self.blobs
            .write()
            .insert(key.clone(), Bytes::copy_from_slice(payload));
        Ok(BlobRef {
            bucket: self.bucket.clone(),
            key,
        })
    }

    fn get(&self, blob: &BlobRef) -> StrataResult<Bytes> {
        self.blobs
            .read()
            .get(&blob.key)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("blob {}/{}", blob.bucket, blob.key)))
    }

    fn delete(&self, blob: &BlobRef) -> StrataResult<()> {
        self.blobs.write().remove(&blob.key);
        Ok(())
    }
}

/// Filesystem-backed blob store.
///
/// Writes stage through a named temp file in the bucket directory and are
/// persisted with an atomic rename; the temp file is removed automatically
/// if anything fails before the rename.
#[derive(Debug)]
pub struct FsBlobStore {
    bucket: String,
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens (creating if needed) a bucket directory under `root`.
    pub fn open(root: impl Into<PathBuf>, bucket: impl Into<String>) -> StrataResult<Self> {
        let root = root.into();
        let bucket = bucket.into();
        std::fs::create_dir_all(root.join(&bucket))?;
        Ok(Self { bucket, root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, payload: &[u8]) -> StrataResult<BlobRef> {
        let key = fresh_key();
        let dir = self.root.join(&self.bucket);
        let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
        staged.write_all(payload)?;
        staged.flush()?;
        staged
            .persist(self.path_for(&key))
            .map_err(|e| StrataError::from(e.error))?;
        debug!(bucket = %self.bucket, %key, bytes = payload.len(), "stored blob");
        Ok(BlobRef {
            bucket: self.bucket.clone(),
            key,
        })
    }

    fn get(&self, blob: &BlobRef) -> StrataResult<Bytes> {
        match std::fs::read(self.path_for(&blob.key)) {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StrataError::not_found(
                format!("blob {}/{}", blob.bucket, blob.key),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, blob: &BlobRef) -> StrataResult<()> {
        match std::fs::remove_file(self.path_for(&blob.key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
