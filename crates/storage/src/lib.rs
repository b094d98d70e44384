#![forbid(unsafe_code)]

use forge_core::now_ms;
use forge_core::snapshot::SnapshotDoc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

const SNAPSHOT_KEY: &str = "engine";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Serde(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Serde(err) => write!(f, "serde: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// One whole-engine snapshot document behind an atomic read-modify-write of
/// a single key. Any store with that much is a valid backend.
pub trait SnapshotStore: Send {
    fn load(&mut self) -> Result<Option<SnapshotDoc>, StoreError>;
    fn save(&mut self, doc: &SnapshotDoc) -> Result<(), StoreError>;
}

fn encode(doc: &SnapshotDoc) -> Result<String, StoreError> {
    Ok(serde_json::to_string(doc)?)
}

fn decode(raw: &str) -> Result<SnapshotDoc, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

/// Volatile backend for tests and `FORGE_PERSISTENCE=memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    raw: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&mut self) -> Result<Option<SnapshotDoc>, StoreError> {
        self.raw.as_deref().map(decode).transpose()
    }

    fn save(&mut self, doc: &SnapshotDoc) -> Result<(), StoreError> {
        self.raw = Some(encode(doc)?);
        Ok(())
    }
}

/// Single JSON file, written to a sibling temp file and renamed into place
/// so readers never observe a torn document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<SnapshotDoc>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(decode(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, doc: &SnapshotDoc) -> Result<(), StoreError> {
        let raw = encode(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// SQLite backend: one row in a key-value table, upserted in place.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS snapshots (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl SnapshotStore for SqliteStore {
    fn load(&mut self) -> Result<Option<SnapshotDoc>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT value FROM snapshots WHERE key = ?1",
                params![SNAPSHOT_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.as_deref().map(decode).transpose()
    }

    fn save(&mut self, doc: &SnapshotDoc) -> Result<(), StoreError> {
        let raw = encode(doc)?;
        self.conn.execute(
            r#"
            INSERT INTO snapshots(key, value, updated_at_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at_ms=excluded.updated_at_ms
            "#,
            params![SNAPSHOT_KEY, raw, now_ms()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> SnapshotDoc {
        SnapshotDoc {
            sequence: 3,
            conflict_sequence: 1,
            change_set_sequence: 2,
            ..SnapshotDoc::default()
        }
    }

    fn temp_dir(test_name: &str) -> PathBuf {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = base.join(format!("forge_storage_{test_name}_{pid}_{nonce}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn memory_round_trip() {
        let mut store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&sample_doc()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample_doc()));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = temp_dir("json");
        let mut store = JsonFileStore::open(dir.join("engine.json")).unwrap();
        assert!(store.load().unwrap().is_none());
        store.save(&sample_doc()).unwrap();
        store.save(&sample_doc()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample_doc()));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sqlite_round_trip() {
        let dir = temp_dir("sqlite");
        let mut store = SqliteStore::open(dir.join("engine.db")).unwrap();
        assert!(store.load().unwrap().is_none());
        store.save(&sample_doc()).unwrap();
        let mut updated = sample_doc();
        updated.sequence = 9;
        store.save(&updated).unwrap();
        assert_eq!(store.load().unwrap().map(|doc| doc.sequence), Some(9));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
