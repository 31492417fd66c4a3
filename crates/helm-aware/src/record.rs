use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Key/value payload of a stored record.
pub type RecordEntries = BTreeMap<String, String>;

/// Opaque token that changes on every committed write to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

impl Revision {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record as read from the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub entries: RecordEntries,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed(Revision),
    /// The record changed (or appeared) since the expected revision was read.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Errors that can occur when talking to a record store.
#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Durable storage of named records with optimistic concurrency.
///
/// Writes are conditional: `expected` must be the revision last read, or
/// `None` to create a record that does not exist yet. Any other state of the
/// record makes the write a [`WriteOutcome::Conflict`].
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn read(&self, record_id: &str) -> Result<Option<StoredRecord>, RecordStoreError>;

    async fn write(
        &self,
        record_id: &str,
        entries: &RecordEntries,
        expected: Option<Revision>,
    ) -> Result<WriteOutcome, RecordStoreError>;

    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome, RecordStoreError>;
}

#[async_trait::async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn read(&self, record_id: &str) -> Result<Option<StoredRecord>, RecordStoreError> {
        (**self).read(record_id).await
    }

    async fn write(
        &self,
        record_id: &str,
        entries: &RecordEntries,
        expected: Option<Revision>,
    ) -> Result<WriteOutcome, RecordStoreError> {
        (**self).write(record_id, entries, expected).await
    }

    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome, RecordStoreError> {
        (**self).delete(record_id).await
    }
}
