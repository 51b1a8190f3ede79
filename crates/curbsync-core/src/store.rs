use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;

/// Durable string-keyed storage for client-held state.
///
/// The reconciliation layer persists its status intent through this trait so
/// tests can substitute [`MemoryKeyValueStore`]; production binds to
/// [`SqliteKeyValueStore`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|err| CoreError::Persistence(err.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, CoreError> {
        let conn =
            Connection::open_in_memory().map_err(|err| CoreError::Persistence(err.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        self.conn
            .lock()
            .expect("key-value store lock poisoned")
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                ",
            )
            .map_err(|err| CoreError::Persistence(err.to_string()))
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        self.conn
            .lock()
            .expect("key-value store lock poisoned")
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| CoreError::Persistence(err.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.conn
            .lock()
            .expect("key-value store lock poisoned")
            .execute(
                "
                INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
                params![key, value],
            )
            .map(|_| ())
            .map_err(|err| CoreError::Persistence(err.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.conn
            .lock()
            .expect("key-value store lock poisoned")
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .map(|_| ())
            .map_err(|err| CoreError::Persistence(err.to_string()))
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .entries
            .lock()
            .expect("key-value store lock poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.entries
            .lock()
            .expect("key-value store lock poisoned")
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries
            .lock()
            .expect("key-value store lock poisoned")
            .remove(key);
        Ok(())
    }
}
