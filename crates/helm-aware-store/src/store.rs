use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use helm_aware::{
    DeleteOutcome, RecordEntries, RecordStore, RecordStoreError, Revision, StoredRecord,
    WriteOutcome,
};
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::schema;

/// A SQLite-backed [`RecordStore`].
///
/// Every committed write takes a fresh revision from a store-wide counter,
/// and conditional writes compare against the stored revision inside one
/// transaction.
pub struct SqliteRecordStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteRecordStore {
    /// Open a store backed by a file on disk, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let conn =
            rusqlite::Connection::open(path).map_err(|e| OpenError::Database(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, OpenError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| OpenError::Database(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: rusqlite::Connection) -> Result<Self, OpenError> {
        schema::migrations()
            .to_latest(&mut conn)
            .map_err(|e| OpenError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, RecordStoreError> {
        self.conn
            .lock()
            .map_err(|_| RecordStoreError::Unavailable("connection lock poisoned".into()))
    }

    fn write_locked(
        conn: &mut rusqlite::Connection,
        record_id: &str,
        entries_json: &str,
        expected: Option<Revision>,
    ) -> rusqlite::Result<WriteOutcome> {
        let tx = conn.transaction()?;

        let next: i64 = tx.query_row(
            "UPDATE revision_seq SET value = value + 1 WHERE id = 0 RETURNING value",
            [],
            |row| row.get(0),
        )?;

        let changed = match expected {
            Some(revision) => tx.execute(
                "UPDATE records SET entries_json = ?1, revision = ?2
                 WHERE id = ?3 AND revision = ?4",
                rusqlite::params![entries_json, next, record_id, to_sql(revision)],
            )?,
            None => tx.execute(
                "INSERT OR IGNORE INTO records (id, entries_json, revision, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![record_id, entries_json, next, Utc::now().to_rfc3339()],
            )?,
        };

        if changed == 0 {
            // Dropping the transaction rolls back the counter bump.
            return Ok(WriteOutcome::Conflict);
        }

        tx.commit()?;
        Ok(WriteOutcome::Committed(Revision::new(next as u64)))
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn read(&self, record_id: &str) -> Result<Option<StoredRecord>, RecordStoreError> {
        let conn = self.lock()?;

        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT entries_json, revision, created_at FROM records WHERE id = ?1",
                [record_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(unavailable)?;

        let Some((entries_json, revision, created_at)) = row else {
            return Ok(None);
        };

        let entries: RecordEntries = serde_json::from_str(&entries_json)
            .map_err(|e| RecordStoreError::Corrupt(format!("{record_id}: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| RecordStoreError::Corrupt(format!("{record_id}: created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(StoredRecord {
            entries,
            revision: Revision::new(revision as u64),
            created_at,
        }))
    }

    async fn write(
        &self,
        record_id: &str,
        entries: &RecordEntries,
        expected: Option<Revision>,
    ) -> Result<WriteOutcome, RecordStoreError> {
        let entries_json =
            serde_json::to_string(entries).map_err(|e| RecordStoreError::Corrupt(e.to_string()))?;

        let mut conn = self.lock()?;
        let outcome = Self::write_locked(&mut conn, record_id, &entries_json, expected)
            .map_err(unavailable)?;

        debug!(record_id, ?expected, ?outcome, "conditional write");
        Ok(outcome)
    }

    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome, RecordStoreError> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM records WHERE id = ?1", [record_id])
            .map_err(unavailable)?;

        Ok(if removed == 0 {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Deleted
        })
    }
}

/// Errors from opening or migrating the database.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),
}

fn unavailable(e: rusqlite::Error) -> RecordStoreError {
    RecordStoreError::Unavailable(e.to_string())
}

fn to_sql(revision: Revision) -> i64 {
    revision.get() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> RecordEntries {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn corrupt_entries_are_reported() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO records (id, entries_json, revision, created_at)
                 VALUES ('broken', 'not json', 1, '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let err = store.read("broken").await.unwrap_err();
        assert!(matches!(err, RecordStoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn conflict_does_not_consume_a_revision() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let first = store.write("r", &entries(&[]), None).await.unwrap();
        assert_eq!(first, WriteOutcome::Committed(Revision::new(1)));

        let conflict = store.write("r", &entries(&[]), None).await.unwrap();
        assert_eq!(conflict, WriteOutcome::Conflict);

        let second = store
            .write("r", &entries(&[("a", "1")]), Some(Revision::new(1)))
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::Committed(Revision::new(2)));
    }
}
