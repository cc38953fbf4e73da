// SQLite backend
// Keeps the whole collection as one JSON value in a key/value table

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{CredentialRecord, StoreBackend};
use crate::error::StoreError;

const COLLECTION_KEY: &str = "channel_credentials";

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(PathBuf::from(parent), e))?;
        }

        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            location: ":memory:".to_string(),
        })
    }
}

fn create_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS credentials_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'credentials_kv'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl StoreBackend for SqliteBackend {
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        create_table(&conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO credentials_kv (key, value) VALUES (?1, '[]')",
            params![COLLECTION_KEY],
        )?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let conn = self.conn.lock();
        if !table_exists(&conn)? {
            return Ok(Vec::new());
        }

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM credentials_kv WHERE key = ?1",
                params![COLLECTION_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn write_all(&self, records: &[CredentialRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string(records)?;
        let conn = self.conn.lock();
        create_table(&conn)?;
        conn.execute(
            "INSERT INTO credentials_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![COLLECTION_KEY, json],
        )?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }
}
