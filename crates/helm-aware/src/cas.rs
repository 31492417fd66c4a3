//! Bounded read-modify-write over a single record.

use tracing::{debug, warn};

use crate::record::{RecordEntries, RecordStore, RecordStoreError, Revision, WriteOutcome};

/// Errors from [`update_record`].
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("record {record_id} still conflicting after {attempts} attempts")]
    Exhausted { record_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] RecordStoreError),
}

/// Apply `mutate` to a record and write it back conditioned on the revision
/// that was read, retrying from a fresh read on conflict.
///
/// A missing record starts out empty and is created by the write. `mutate`
/// runs once per attempt, always against the entries of that attempt's
/// read. Gives up with [`CasError::Exhausted`] after `max_attempts`
/// conflicting writes.
pub async fn update_record<S, F>(
    store: &S,
    record_id: &str,
    max_attempts: u32,
    mut mutate: F,
) -> Result<Revision, CasError>
where
    S: RecordStore + ?Sized,
    F: FnMut(&mut RecordEntries),
{
    for attempt in 1..=max_attempts {
        let (mut entries, expected) = match store.read(record_id).await? {
            Some(record) => (record.entries, Some(record.revision)),
            None => {
                debug!(record_id, "record absent, creating");
                (RecordEntries::new(), None)
            }
        };

        mutate(&mut entries);

        match store.write(record_id, &entries, expected).await? {
            WriteOutcome::Committed(revision) => {
                debug!(record_id, attempt, %revision, "record committed");
                return Ok(revision);
            }
            WriteOutcome::Conflict => {
                warn!(record_id, attempt, max_attempts, "record update conflict, retrying");
            }
        }
    }

    Err(CasError::Exhausted {
        record_id: record_id.to_owned(),
        attempts: max_attempts,
    })
}
