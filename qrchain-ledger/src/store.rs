//! Snapshot persistence.
//!
//! The ledger itself never touches storage. Hosts that need state to outlive
//! the process (the CLI, mainly) save and load [`LedgerSnapshot`]s through a
//! [`SnapshotStore`].
//!
//! Several processes may share one [`JsonFileStore`]. Each one that runs a
//! load, apply, save cycle must hold [`JsonFileStore::lock`] for the whole
//! cycle, otherwise concurrent cycles overwrite each other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::snapshot::LedgerSnapshot;

/// Error types for snapshot storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored bytes are not a valid sealed snapshot
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored digest does not match the snapshot content
    #[error("Snapshot digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// Trait for loading and saving ledger snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the stored snapshot, or `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;
}

/// A snapshot together with the digest it was sealed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSnapshot {
    pub digest: String,
    pub snapshot: LedgerSnapshot,
}

impl SealedSnapshot {
    pub fn seal(snapshot: LedgerSnapshot) -> Result<Self, StoreError> {
        Ok(Self {
            digest: snapshot.digest()?,
            snapshot,
        })
    }

    /// Check the digest and hand back the snapshot.
    pub fn open(self) -> Result<LedgerSnapshot, StoreError> {
        let actual = self.snapshot.digest()?;
        if actual != self.digest {
            return Err(StoreError::DigestMismatch {
                expected: self.digest,
                actual,
            });
        }
        Ok(self.snapshot)
    }
}

/// Stores a sealed snapshot as pretty-printed JSON in a single file.
///
/// Saves write a uniquely named sibling temp file and rename it into place,
/// so a crash mid-save leaves the previous snapshot intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Sidecar file carrying the advisory lock.
    ///
    /// The snapshot file itself is replaced on every save, so a lock on it
    /// would pin a stale inode.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Take the exclusive lock, waiting for any other holder to release it.
    pub async fn lock(&self) -> Result<StoreLock, StoreError> {
        let lock_path = self.lock_path();
        let dir = self.parent_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&open_path)?;
            fs4::fs_std::FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| StoreError::Io {
            path: lock_path.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| StoreError::Io {
            path: lock_path.clone(),
            source,
        })?;

        debug!(path = %lock_path.display(), "Store lock acquired");
        Ok(StoreLock {
            _file: file,
            path: lock_path,
        })
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Exclusive hold on a [`JsonFileStore`]. Released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock.
        debug!(path = %self.path.display(), "Store lock released");
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot file yet");
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let sealed: SealedSnapshot = serde_json::from_slice(&bytes)?;
        let snapshot = sealed.open()?;
        debug!(
            path = %self.path.display(),
            products = snapshot.products.len(),
            "Loaded snapshot"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        let sealed = SealedSnapshot::seal(snapshot.clone())?;
        let json = serde_json::to_vec_pretty(&sealed)?;

        let dir = self.parent_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| self.io_error(e))?;

        let target = self.path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&json)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| self.io_error(std::io::Error::other(e)))?
        .map_err(|e| self.io_error(e))?;

        info!(
            path = %self.path.display(),
            digest = %sealed.digest,
            products = snapshot.products.len(),
            "Saved snapshot"
        );
        Ok(())
    }
}

/// In-memory store, sealed the same way as the file store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slot: Arc<RwLock<Option<SealedSnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        let slot = self.slot.read().await;
        slot.clone().map(SealedSnapshot::open).transpose()
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        let sealed = SealedSnapshot::seal(snapshot.clone())?;
        *self.slot.write().await = Some(sealed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::Ledger;

    async fn sample_snapshot() -> LedgerSnapshot {
        let ledger = Ledger::deploy("owner", LedgerConfig::new("store-test"));
        ledger
            .connect("owner")
            .create_product("QR-DURIAN-1", "Freshly Harvested")
            .await
            .unwrap();
        ledger.snapshot().await
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("ledger.json"));

        assert!(store.load().await.unwrap().is_none());
        assert!(!store.exists().await);

        let snapshot = sample_snapshot().await;
        store.save(&snapshot).await.unwrap();
        assert!(store.exists().await);
        // The temp file was renamed into place, nothing else is left behind.
        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_file_store_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = JsonFileStore::new(&path);
        store.save(&sample_snapshot().await).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("Freshly Harvested", "Imported")).unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StoreError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn test_io_error_names_path_once() {
        let err = StoreError::Io {
            path: PathBuf::from("/var/lib/qrchain/ledger.json"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.to_string(), "I/O error on /var/lib/qrchain/ledger.json");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = JsonFileStore::new(&path);

        let held = store.lock().await.unwrap();
        assert!(store.lock_path().exists());

        let waiter = tokio::spawn(async move { JsonFileStore::new(path).lock().await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let second = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let snapshot = sample_snapshot().await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let path = path.clone();
            let snapshot = snapshot.clone();
            tasks.push(tokio::spawn(async move {
                JsonFileStore::new(path).save(&snapshot).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(JsonFileStore::new(&path).load().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());

        let snapshot = sample_snapshot().await;
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }
}
