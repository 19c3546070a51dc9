//! Abstract checkpoint storage.
//!
//! The engine never chooses a wire format or a backend; it only needs
//! `save(id, bytes)` / `load(id) -> bytes`. Everything about *how* a checkpoint
//! is encoded (JSON, bincode, protobuf, ...) or *where* it lives (disk, Redis,
//! a database) is the caller's business. [`InMemoryCheckpointStore`] is the
//! reference implementation used by tests, examples, and anyone who doesn't
//! need durability across process restarts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CheckpointError, Result};

/// Storage backend for serialized run checkpoints.
///
/// Implementors own the encoding; `compose-core` hands over opaque bytes
/// produced by its own (de)serialization of channel state and gets the same
/// bytes back on `load`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `bytes` under `id`, overwriting any previous checkpoint at that id.
    async fn save(&self, id: &str, bytes: Vec<u8>) -> Result<()>;

    /// Load the bytes previously saved under `id`.
    ///
    /// Returns [`CheckpointError::NotFound`] if nothing is stored there.
    async fn load(&self, id: &str) -> Result<Vec<u8>>;

    /// Drop a checkpoint. Resuming from a deleted id is an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Whether a checkpoint exists under `id`, without loading its bytes.
    async fn exists(&self, id: &str) -> Result<bool> {
        match self.load(id).await {
            Ok(_) => Ok(true),
            Err(CheckpointError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Thread-safe in-memory [`CheckpointStore`].
///
/// Checkpoints do not survive process restart; use this for tests, demos, and
/// short-lived single-process runs.
#[derive(Default, Clone)]
pub struct InMemoryCheckpointStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every stored checkpoint. Useful for test isolation.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of checkpoints currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store currently holds no checkpoints.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, id: &str, bytes: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(id.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Vec<u8>> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCheckpointStore::new();
        store.save("run-1", vec![1, 2, 3]).await.unwrap();
        let bytes = store.load("run-1").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = InMemoryCheckpointStore::new();
        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn save_overwrites_previous_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        store.save("run-1", vec![1]).await.unwrap();
        store.save("run-1", vec![2]).await.unwrap();
        assert_eq!(store.load("run-1").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn delete_removes_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        store.save("run-1", vec![1]).await.unwrap();
        store.delete("run-1").await.unwrap();
        assert!(!store.exists("run-1").await.unwrap());
    }

    #[tokio::test]
    async fn exists_reflects_presence() {
        let store = InMemoryCheckpointStore::new();
        assert!(!store.exists("run-1").await.unwrap());
        store.save("run-1", vec![0]).await.unwrap();
        assert!(store.exists("run-1").await.unwrap());
    }
}
