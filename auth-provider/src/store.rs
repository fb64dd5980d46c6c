//! Persistence backend interface and the share-state facade.
//!
//! The backend is a byte-addressed key-value store; keys are string
//! paths. The provider writes all share state as a single blob under one
//! fixed key, so backend writes are trivially last-writer-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// The fixed key path the provider stores its share state under.
pub const SHARES_KEY: [&str; 2] = ["AuthProvider", "shares"];

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to read or write.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A byte-addressed key-value persistence backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Write a value under a key path, replacing any previous value.
    async fn save(&self, key_path: &[&str], value: Vec<u8>) -> Result<(), StoreError>;

    /// Read the value under a key path, if any.
    async fn load(&self, key_path: &[&str]) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-memory store for testing.
///
/// Clones share the same underlying map, so a "restarted" provider can
/// reuse the store of a previous one.
#[derive(Default, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<Vec<String>, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Clear all stored values.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, key_path: &[&str], value: Vec<u8>) -> Result<(), StoreError> {
        let key: Vec<String> = key_path.iter().map(|s| s.to_string()).collect();
        self.entries.lock().unwrap().insert(key, value);
        Ok(())
    }

    async fn load(&self, key_path: &[&str]) -> Result<Option<Vec<u8>>, StoreError> {
        let key: Vec<String> = key_path.iter().map(|s| s.to_string()).collect();
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }
}

/// Namespaced facade over the backend for the provider's share blob.
#[derive(Clone)]
pub struct ShareStore {
    backend: Arc<dyn Store>,
}

impl ShareStore {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn Store>) -> Self {
        Self { backend }
    }

    /// Write the share blob.
    pub async fn save_shares(&self, blob: Vec<u8>) -> Result<(), StoreError> {
        self.backend.save(&SHARES_KEY, blob).await
    }

    /// Read the share blob, if one has been written.
    pub async fn load_shares(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.backend.load(&SHARES_KEY).await
    }
}
