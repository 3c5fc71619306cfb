use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::warn;

const SCHEMA_VERSION: u32 = 1;

/// Structured tier of the persistent store: small JSON records under
/// namespaced keys (`pkg:<name>`, `stats:<fingerprint>`,
/// `flag:<fingerprint>:<flag>`, `aliases`).
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open (or create) the record index at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or its schema is
    /// from an incompatible future version.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open record store {}", path.display()))?;
        Self::initialize(conn)
    }

    /// An in-memory record store, for tests.
    ///
    /// # Errors
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS records (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )
        .context("failed to create record tables")?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read schema version")?;
        match existing {
            Some(version) if version != SCHEMA_VERSION.to_string() => {
                // Older or newer index: start over rather than guess at the
                // layout. Records are a cache, losing them is safe.
                conn.execute("DELETE FROM records", [])
                    .context("failed to reset record table")?;
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .context("failed to stamp schema version")?;
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .context("failed to stamp schema version")?;
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch a record. Misses and storage errors are both soft.
    #[must_use]
    pub fn get_record(&self, key: &str) -> Option<Value> {
        let conn = self.conn.lock().expect("record store poisoned");
        let raw: Option<String> = match conn
            .query_row("SELECT value FROM records WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, %err, "record read failed; treating as miss");
                return None;
            }
        };
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, %err, "record is not valid JSON; treating as miss");
                    None
                }
            },
            None => None,
        }
    }

    /// # Errors
    /// Returns an error if the record cannot be written.
    pub fn put_record(&self, key: &str, value: &Value) -> Result<()> {
        let conn = self.conn.lock().expect("record store poisoned");
        conn.execute(
            "INSERT INTO records (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value.to_string()],
        )
        .with_context(|| format!("failed to write record {key}"))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the delete statement fails.
    pub fn delete_record(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().expect("record store poisoned");
        conn.execute("DELETE FROM records WHERE key = ?1", params![key])
            .with_context(|| format!("failed to delete record {key}"))?;
        Ok(())
    }

    /// Keys under a namespace prefix, sorted.
    #[must_use]
    pub fn list_keys(&self, prefix: &str) -> Vec<String> {
        let conn = self.conn.lock().expect("record store poisoned");
        let mut statement = match conn
            .prepare("SELECT key FROM records WHERE key LIKE ?1 || '%' ORDER BY key")
        {
            Ok(statement) => statement,
            Err(err) => {
                warn!(prefix, %err, "record listing failed");
                return Vec::new();
            }
        };
        let rows = statement.query_map(params![prefix], |row| row.get::<_, String>(0));
        match rows {
            Ok(rows) => rows.filter_map(std::result::Result::ok).collect(),
            Err(err) => {
                warn!(prefix, %err, "record listing failed");
                Vec::new()
            }
        }
    }

    /// Drop every record. Used by the explicit user reset.
    ///
    /// # Errors
    /// Returns an error if the table cannot be cleared.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().expect("record store poisoned");
        conn.execute("DELETE FROM records", [])
            .context("failed to clear records")?;
        Ok(())
    }
}
