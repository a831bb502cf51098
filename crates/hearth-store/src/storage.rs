//! Durable key-value storage.
//!
//! The record store only needs a tiny, preference-style contract: string and
//! integer cells under string keys, key deletion, and an explicit flush.
//! [`KeyValueStorage`] captures exactly that so the backing medium can be
//! swapped without touching the record encoding.
//!
//! Two backends ship with the crate:
//!
//! - [`SqliteStorage`] – a single SQLite table; every statement autocommits,
//!   so a write is durable as soon as the call returns.
//! - [`MemoryStorage`] – a shared in-process map.  Clones share the same
//!   cells, which lets tests "restart" by building a new store over a clone.
//!
//! # Storage layout (SQLite)
//!
//! | column | type | description                                  |
//! |--------|------|----------------------------------------------|
//! | key    | TEXT | Primary key                                  |
//! | kind   | TEXT | `"string"` or `"int"`                        |
//! | value  | TEXT | Cell contents (integers stored as decimal)   |

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use hearth_types::HearthError;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Storage lock poisoned")]
    Poisoned,
}

impl From<StorageError> for HearthError {
    fn from(e: StorageError) -> Self {
        HearthError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Simple string-keyed persistent storage.
///
/// A key holds either a string or an integer cell.  Reading a key through the
/// accessor of the other kind yields `None`, as does reading a missing key;
/// callers supply their own defaults.
pub trait KeyValueStorage: Send {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError>;

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), StorageError>;

    /// Remove `key`.  Deleting a missing key is not an error.
    fn delete_key(&mut self, key: &str) -> Result<(), StorageError>;

    /// Flush pending writes to the durable medium.
    fn save(&mut self) -> Result<(), StorageError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteStorage
// ─────────────────────────────────────────────────────────────────────────────

const KIND_STRING: &str = "string";
const KIND_INT: &str = "int";

/// SQLite-backed [`KeyValueStorage`].
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_cells (
                key   TEXT NOT NULL PRIMARY KEY,
                kind  TEXT NOT NULL,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn get_cell(&self, key: &str, kind: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_cells WHERE key = ?1 AND kind = ?2",
                params![key, kind],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_cell(&mut self, key: &str, kind: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv_cells (key, kind, value) VALUES (?1, ?2, ?3)",
            params![key, kind, value],
        )?;
        Ok(())
    }
}

impl KeyValueStorage for SqliteStorage {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.get_cell(key, KIND_STRING)
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_cell(key, KIND_STRING, value)
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError> {
        Ok(self
            .get_cell(key, KIND_INT)?
            .and_then(|raw| raw.parse::<i64>().ok()))
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), StorageError> {
        self.set_cell(key, KIND_INT, &value.to_string())
    }

    fn delete_key(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv_cells WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn save(&mut self) -> Result<(), StorageError> {
        // No explicit transaction is ever opened, so each statement above has
        // already been committed.
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStorage
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Str(String),
    Int(i64),
}

/// In-process [`KeyValueStorage`].  Clones share the same cells.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    cells: Arc<Mutex<HashMap<String, Cell>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy of the current cells, detached from `self`.
    pub fn snapshot(&self) -> Result<Self, StorageError> {
        let cells = self.lock()?.clone();
        Ok(Self {
            cells: Arc::new(Mutex::new(cells)),
        })
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Cell>>, StorageError> {
        self.cells.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(match self.lock()?.get(key) {
            Some(Cell::Str(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?
            .insert(key.to_string(), Cell::Str(value.to_string()));
        Ok(())
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError> {
        Ok(match self.lock()?.get(key) {
            Some(Cell::Int(v)) => Some(*v),
            _ => None,
        })
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), Cell::Int(value));
        Ok(())
    }

    fn delete_key(&mut self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn save(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_backend(storage: &mut dyn KeyValueStorage) {
        assert_eq!(storage.get_string("missing").unwrap(), None);
        assert_eq!(storage.get_int("missing").unwrap(), None);

        storage.set_string("name", "lamp").unwrap();
        storage.set_int("count", 3).unwrap();
        assert_eq!(storage.get_string("name").unwrap().as_deref(), Some("lamp"));
        assert_eq!(storage.get_int("count").unwrap(), Some(3));

        // Kind mismatch reads as absent.
        assert_eq!(storage.get_int("name").unwrap(), None);
        assert_eq!(storage.get_string("count").unwrap(), None);

        // Overwrite with the other kind.
        storage.set_string("count", "three").unwrap();
        assert_eq!(storage.get_int("count").unwrap(), None);
        assert_eq!(storage.get_string("count").unwrap().as_deref(), Some("three"));

        storage.delete_key("name").unwrap();
        storage.delete_key("never-existed").unwrap();
        assert_eq!(storage.get_string("name").unwrap(), None);
        storage.save().unwrap();
    }

    #[test]
    fn memory_backend_contract() {
        let mut storage = MemoryStorage::new();
        exercise_backend(&mut storage);
    }

    #[test]
    fn sqlite_backend_contract() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        exercise_backend(&mut storage);
    }

    #[test]
    fn memory_clones_share_cells() {
        let mut a = MemoryStorage::new();
        let b = a.clone();
        a.set_int("numUuids", 2).unwrap();
        assert_eq!(b.get_int("numUuids").unwrap(), Some(2));
    }

    #[test]
    fn memory_snapshot_is_detached() {
        let mut a = MemoryStorage::new();
        a.set_string("k", "v1").unwrap();
        let snap = a.snapshot().unwrap();
        a.set_string("k", "v2").unwrap();
        assert_eq!(snap.get_string("k").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn sqlite_cells_survive_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("anchors.db");
        {
            let mut storage = SqliteStorage::open(&path).unwrap();
            storage.set_string("uuid0", "abc;Lamp").unwrap();
            storage.set_int("numUuids", 1).unwrap();
            storage.save().unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get_int("numUuids").unwrap(), Some(1));
        assert_eq!(
            storage.get_string("uuid0").unwrap().as_deref(),
            Some("abc;Lamp")
        );
    }
}
