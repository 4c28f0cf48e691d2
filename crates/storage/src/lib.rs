//! Snapshot persistence for registered fences.
//!
//! Hosts drop their registrations on reboot or app update; persisting the
//! registry snapshot lets the app restore it with `Registry::restore`.

use chrono::Utc;
use geofence_model::Fence;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistence for fence snapshots.
pub trait FenceRepository {
    type Error;
    fn save(&self, fence: &Fence) -> std::result::Result<(), Self::Error>;
    fn save_all(&self, fences: &[Fence]) -> std::result::Result<(), Self::Error>;
    fn get(&self, id: &str) -> std::result::Result<Fence, Self::Error>;
    fn load_all(&self) -> std::result::Result<Vec<Fence>, Self::Error>;
    fn delete(&self, id: &str) -> std::result::Result<(), Self::Error>;
    fn clear(&self) -> std::result::Result<(), Self::Error>;
}

pub struct FenceStore {
    conn: Mutex<Connection>,
}

impl FenceStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fences (
                id TEXT PRIMARY KEY,
                fence_json TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fences_saved_at ON fences(saved_at);
            "#,
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM fences", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl FenceRepository for FenceStore {
    type Error = StorageError;

    fn save(&self, fence: &Fence) -> Result<()> {
        let json = serde_json::to_string(fence)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO fences (id, fence_json, saved_at) VALUES (?1, ?2, ?3)",
            (&fence.id, json, Utc::now().timestamp_millis()),
        )?;
        Ok(())
    }

    /// Replace the stored snapshot with `fences` in one transaction.
    fn save_all(&self, fences: &[Fence]) -> Result<()> {
        let rows = fences
            .iter()
            .map(|fence| -> Result<(&str, String)> {
                Ok((fence.id.as_str(), serde_json::to_string(fence)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let saved_at = Utc::now().timestamp_millis();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM fences", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO fences (id, fence_json, saved_at) VALUES (?1, ?2, ?3)",
            )?;
            for (id, json) in &rows {
                stmt.execute((id, json, saved_at))?;
            }
        }
        tx.commit()?;

        tracing::debug!(fences = rows.len(), "Saved fence snapshot");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Fence> {
        let json: Option<String> = self
            .conn()
            .query_row("SELECT fence_json FROM fences WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let json = json.ok_or_else(|| StorageError::NotFound(format!("fence {id}")))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Every stored fence, sorted by id. Rows that no longer decode are
    /// skipped with a warning.
    fn load_all(&self) -> Result<Vec<Fence>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, fence_json FROM fences ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fences = Vec::new();
        for row in rows {
            let (id, json) = row?;
            match serde_json::from_str(&json) {
                Ok(fence) => fences.push(fence),
                Err(err) => tracing::warn!(fence_id = %id, error = %err, "Skipping undecodable stored fence"),
            }
        }
        Ok(fences)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let affected = self.conn().execute("DELETE FROM fences WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("fence {id}")));
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn().execute("DELETE FROM fences", [])?;
        Ok(())
    }
}
