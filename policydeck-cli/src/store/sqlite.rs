use async_trait::async_trait;
use policydeck_core::preset::{RecordStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed record storage
///
/// Each record is one row keyed by its record key. The preset repository
/// rewrites its whole envelope on every mutation, so a single upsert per
/// write keeps the store consistent.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use policydeck_cli::SqliteRecordStore;
/// use policydeck_core::preset::{PresetRepository, PresetStore};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let records = SqliteRecordStore::new(".policydeck/presets.db")?;
/// let presets = PresetStore::new(Arc::new(PresetRepository::new(records)));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path`.
    ///
    /// Creates the parent directory and the schema if they don't exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .map_err(|e| StoreError::Read(format!("Failed to open database: {}", e)))?;
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(|e| StoreError::Write(format!("Failed to initialize schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Default location under the user's data directory, falling back to
    /// `.policydeck/presets.db` in the current directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("policydeck"))
            .unwrap_or_else(|| PathBuf::from(".policydeck"))
            .join("presets.db")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Read("database connection poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT value FROM records WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| StoreError::Read(e.to_string()))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )
        .map_err(|e| StoreError::Write(e.to_string()))?;
        log::debug!("Wrote record {} ({} bytes)", key, value.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policydeck_core::policy::Profile;
    use policydeck_core::preset::{PresetInput, PresetRepository, PresetStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_missing_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::new(temp_dir.path().join("test.db")).unwrap();

        assert_eq!(store.read("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_replaces_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteRecordStore::new(temp_dir.path().join("test.db")).unwrap();

        store.write("k", "first").await.unwrap();
        store.write("k", "second").await.unwrap();

        assert_eq!(store.read("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("deeper").join("test.db");

        let store = SqliteRecordStore::new(&db_path).unwrap();
        store.write("k", "v").await.unwrap();

        assert!(db_path.exists());
        assert_eq!(store.path(), &db_path);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let first = PresetStore::new(Arc::new(PresetRepository::new(
            SqliteRecordStore::new(&db_path).unwrap(),
        )));
        first
            .create(PresetInput::new("Reviewer", Profile::Minimal))
            .await;

        let second = PresetStore::new(Arc::new(PresetRepository::new(
            SqliteRecordStore::new(&db_path).unwrap(),
        )));
        let presets = second.list().await;
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].name, "Reviewer");
    }
}
