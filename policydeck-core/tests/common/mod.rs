//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use async_trait::async_trait;
use policydeck_core::gateway::{methods, GatewayClient, RemoteError};
use policydeck_core::preset::{MemoryRecordStore, RecordStore, StoreError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

// ===== Record Stores =====

/// A memory record store whose contents stay reachable after it is handed to
/// a repository.
#[derive(Clone, Default)]
pub struct SharedRecords(pub Arc<MemoryRecordStore>);

impl SharedRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(key: &str, value: &str) -> Self {
        Self(Arc::new(MemoryRecordStore::with_records([(key, value)])))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.read(key).await.unwrap()
    }
}

#[async_trait]
impl RecordStore for SharedRecords {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.0.read(key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.0.write(key, value).await
    }
}

/// A record store that reads normally but refuses every write.
pub struct ReadOnlyRecords(pub MemoryRecordStore);

#[async_trait]
impl RecordStore for ReadOnlyRecords {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.0.read(key).await
    }

    async fn write(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Write("storage quota exceeded".to_string()))
    }
}

// ===== Gateway =====

/// A gateway holding one configuration document.
///
/// `config.set` replaces the document unless `fail_writes` is set. Agent calls
/// answer from a fixed list.
#[derive(Clone)]
pub struct FakeGateway {
    pub config: Arc<Mutex<Value>>,
    pub revision: Arc<Mutex<u64>>,
    pub fail_writes: Arc<Mutex<bool>>,
    pub writes: Arc<Mutex<usize>>,
}

impl FakeGateway {
    pub fn new(config: Value) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            revision: Arc::new(Mutex::new(1)),
            fail_writes: Arc::new(Mutex::new(false)),
            writes: Arc::new(Mutex::new(0)),
        }
    }

    /// A document with a coding global policy and agents `a1` and `a2`.
    pub fn standard() -> Self {
        Self::new(json!({
            "tools": { "profile": "coding" },
            "agents": { "list": [{ "id": "a1" }, { "id": "a2" }] }
        }))
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn document(&self) -> Value {
        self.config.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl GatewayClient for FakeGateway {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        match method {
            methods::CONFIG_GET => Ok(json!({
                "config": self.document(),
                "hash": format!("h{}", self.revision.lock().unwrap()),
            })),
            methods::CONFIG_SET => {
                if *self.fail_writes.lock().unwrap() {
                    return Err(RemoteError::request(method, "gateway unavailable"));
                }
                let raw = params["raw"].as_str().unwrap_or_default();
                let next: Value = serde_json::from_str(raw)
                    .map_err(|e| RemoteError::request(method, e.to_string()))?;
                *self.config.lock().unwrap() = next;
                *self.revision.lock().unwrap() += 1;
                *self.writes.lock().unwrap() += 1;
                Ok(json!({ "ok": true }))
            }
            methods::AGENTS_LIST => Ok(json!({
                "agents": [{ "id": "a1" }, { "id": "a2" }],
                "defaultId": "a1"
            })),
            other => Err(RemoteError::request(other, "unsupported in tests")),
        }
    }
}
