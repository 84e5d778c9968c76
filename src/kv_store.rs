//! Key-value persistence backends for the local record store

use anyhow::{anyhow, Result};
use native_db::{Builder, Database, Models};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::models::KvEntry;

static MODELS: Lazy<Models> = Lazy::new(|| {
    let mut models = Models::new();
    models
        .define::<KvEntry>()
        .expect("KvEntry is a valid native_db model");
    models
});

/// String values addressed by string keys.
/// A single-key write replaces the whole value and is atomic.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set_item(&self, key: &str, value: String) -> impl Future<Output = Result<()>> + Send;

    /// Removes the key; removing an absent key succeeds
    fn remove_item(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

// ===== NATIVE_DB BACKEND =====

/// Store backed by an embedded native_db database
#[derive(Clone)]
pub struct NativeDbStore {
    database: Arc<Database<'static>>,
}

impl std::fmt::Debug for NativeDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDbStore").finish_non_exhaustive()
    }
}

impl NativeDbStore {
    /// Opens (or creates) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let database = Builder::new()
            .create(&MODELS, path)
            .map_err(|e| anyhow!("Failed to open local store at {}: {}", path.display(), e))?;

        tracing::debug!("Opened local store at {}", path.display());
        Ok(Self {
            database: Arc::new(database),
        })
    }

    /// Creates a store that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        let database = Builder::new()
            .create_in_memory(&MODELS)
            .map_err(|e| anyhow!("Failed to create in-memory store: {}", e))?;

        Ok(Self {
            database: Arc::new(database),
        })
    }
}

impl KeyValueStore for NativeDbStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let database = self.database.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let r = database.r_transaction()?;
            let entry: Option<KvEntry> = r.get().primary(key)?;
            Ok(entry.map(|entry| entry.value))
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        let database = self.database.clone();
        let entry = KvEntry::new(key, value);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let rw = database.rw_transaction()?;
            rw.upsert(entry)?;
            rw.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let database = self.database.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let rw = database.rw_transaction()?;
            let existing: Option<KvEntry> = rw.get().primary(key)?;
            if let Some(entry) = existing {
                rw.remove(entry)?;
            }
            rw.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
    }
}

// ===== IN-MEMORY BACKEND =====

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

// ===== PER-KEY SERIALIZATION =====

/// One async mutex per key. Holding a key's guard serializes read-modify-write
/// sequences on that key; different keys never block each other.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
