//! Durable storage for the preset envelope.
//!
//! [`RecordStore`] is the storage seam: a key/value store of named records.
//! [`PresetRepository`] sits on top of it and owns the envelope format,
//! migration and the read-modify-write cycle.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::codec;
use super::types::PersistedStore;

/// Record key of the current-version envelope.
pub const STORE_KEY: &str = "tool-policy-presets.v2";

/// Record key of the legacy envelope.
pub const LEGACY_STORE_KEY: &str = "tool-policy-presets.v1";

/// Errors that can occur in record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to read a record from storage.
    #[error("Failed to read record: {0}")]
    Read(String),

    /// Failed to write a record to storage.
    #[error("Failed to write record: {0}")]
    Write(String),

    /// IO error during storage operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for durable key/value record storage.
///
/// Implementations store opaque text records under string keys. The preset
/// engine never interprets storage details beyond this contract.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the record stored under `key`, or `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the record stored under `key`.
    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory record store.
///
/// Records are cleared when the process exits. Useful as a test fake.
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryRecordStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store pre-populated with records.
    pub fn with_records<I, K, V>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .records
            .read()
            .expect("RwLock poisoned")
            .get(key)
            .cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.records
            .write()
            .expect("RwLock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File-based record store.
///
/// Each record is a `<key>.json` file inside a directory. The directory is
/// created when the first record is written. Writes go to a temporary file
/// that is then renamed over the target, so readers never see a torn record.
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Create a new file-based store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&path).await?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(contents))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{}.json.tmp", key));
        tokio::fs::write(&tmp_path, value).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

/// Record keys the repository reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub current: String,
    pub legacy: String,
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self {
            current: STORE_KEY.to_string(),
            legacy: LEGACY_STORE_KEY.to_string(),
        }
    }
}

/// Loads and saves the whole preset envelope.
///
/// Every [`load`](Self::load) re-reads and re-parses the stored record; no
/// in-memory copy is authoritative across calls.
pub struct PresetRepository {
    records: Box<dyn RecordStore>,
    keys: StoreKeys,
    write_lock: tokio::sync::Mutex<()>,
}

impl PresetRepository {
    /// Create a repository over a record store.
    pub fn new(records: impl RecordStore + 'static) -> Self {
        Self::with_boxed_store(Box::new(records))
    }

    /// Create a repository over a boxed record store.
    pub fn with_boxed_store(records: Box<dyn RecordStore>) -> Self {
        Self {
            records,
            keys: StoreKeys::default(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Use custom record keys.
    pub fn with_keys(mut self, keys: StoreKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// Create a repository backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryRecordStore::new())
    }

    /// Load the current envelope.
    ///
    /// Falls back to the legacy record (migrating it once) and finally to an
    /// empty store. Never fails.
    pub async fn load(&self) -> PersistedStore {
        let _guard = self.write_lock.lock().await;
        self.load_unlocked().await
    }

    /// Write the whole envelope.
    pub async fn save(&self, store: &PersistedStore) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.save_unlocked(store).await
    }

    /// Run a read-modify-write cycle.
    ///
    /// `change` returns `true` when it modified the envelope; only then is the
    /// envelope written. Write failures are logged and swallowed: the modified
    /// envelope is returned either way.
    pub async fn modify<F>(&self, change: F) -> PersistedStore
    where
        F: FnOnce(&mut PersistedStore) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut store = self.load_unlocked().await;
        if change(&mut store) {
            if let Err(e) = self.save_unlocked(&store).await {
                log::warn!("Failed to persist tool policy presets: {}", e);
            }
        }
        store
    }

    async fn read_record(&self, key: &str) -> Option<String> {
        match self.records.read(key).await {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Failed to read record {}: {}", key, e);
                None
            }
        }
    }

    async fn load_unlocked(&self) -> PersistedStore {
        if let Some(store) = self
            .read_record(&self.keys.current)
            .await
            .as_deref()
            .and_then(codec::decode_current)
        {
            return store;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let Some(migrated) = self
            .read_record(&self.keys.legacy)
            .await
            .as_deref()
            .and_then(|raw| codec::decode_legacy(raw, now_ms))
        else {
            return PersistedStore::default();
        };

        log::debug!(
            "Migrating {} legacy tool policy presets",
            migrated.presets.len()
        );
        if let Err(e) = self.save_unlocked(&migrated).await {
            log::warn!("Failed to persist migrated tool policy presets: {}", e);
        }
        migrated
    }

    async fn save_unlocked(&self, store: &PersistedStore) -> Result<(), StoreError> {
        let encoded = codec::encode(store)?;
        self.records.write(&self.keys.current, &encoded).await
    }
}
