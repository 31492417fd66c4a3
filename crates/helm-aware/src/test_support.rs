use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::identity::ChartIdentity;
use crate::index::{ChartIndex, SearchEntry};
use crate::record::{
    DeleteOutcome, RecordEntries, RecordStore, RecordStoreError, Revision, StoredRecord,
    WriteOutcome,
};
use crate::resolver::{IndexFetcher, RegistrySearch, ResolveError, VersionLookup};

/// In-memory record store for testing, with hooks to force conflicts and
/// outages.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, StoredRecord>>,
    pending_conflicts: AtomicU32,
    interleaved: Mutex<Option<(String, String, String)>>,
    unavailable: AtomicBool,
    write_attempts: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes report a conflict without changing the
    /// record.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Commit `key = value` on behalf of another writer just before the next
    /// write is checked, so that write conflicts.
    pub fn interleave_write(&self, record_id: &str, key: &str, value: &str) {
        *self.interleaved.lock().unwrap() =
            Some((record_id.to_owned(), key.to_owned(), value.to_owned()));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RecordStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn apply_interleaved(&self, records: &mut HashMap<String, StoredRecord>) {
        let Some((record_id, key, value)) = self.interleaved.lock().unwrap().take() else {
            return;
        };

        let record = records.entry(record_id).or_insert_with(|| StoredRecord {
            entries: RecordEntries::new(),
            revision: Revision::new(0),
            created_at: Utc::now(),
        });
        record.entries.insert(key, value);
        record.revision = record.revision.next();
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn read(&self, record_id: &str) -> Result<Option<StoredRecord>, RecordStoreError> {
        self.check_available()?;
        Ok(self.records.lock().unwrap().get(record_id).cloned())
    }

    async fn write(
        &self,
        record_id: &str,
        entries: &RecordEntries,
        expected: Option<Revision>,
    ) -> Result<WriteOutcome, RecordStoreError> {
        self.check_available()?;
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        let forced = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(WriteOutcome::Conflict);
        }

        let mut records = self.records.lock().unwrap();
        self.apply_interleaved(&mut records);

        let current = records.get(record_id).map(|r| r.revision);
        if current != expected {
            return Ok(WriteOutcome::Conflict);
        }

        let revision = current.map_or(Revision::new(1), Revision::next);
        let created_at = records
            .get(record_id)
            .map_or_else(Utc::now, |r| r.created_at);
        records.insert(
            record_id.to_owned(),
            StoredRecord {
                entries: entries.clone(),
                revision,
                created_at,
            },
        );
        Ok(WriteOutcome::Committed(revision))
    }

    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome, RecordStoreError> {
        self.check_available()?;
        match self.records.lock().unwrap().remove(record_id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}

/// Index fetcher serving canned `index.yaml` bodies per repository URL.
#[derive(Default)]
pub struct StaticIndexFetcher {
    responses: HashMap<String, Result<String, ResolveError>>,
    calls: Arc<AtomicUsize>,
}

impl StaticIndexFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, repo_url: &str, body: &str) -> Self {
        self.responses.insert(repo_url.to_owned(), Ok(body.to_owned()));
        self
    }

    pub fn with_error(mut self, repo_url: &str, error: ResolveError) -> Self {
        self.responses.insert(repo_url.to_owned(), Err(error));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl IndexFetcher for StaticIndexFetcher {
    async fn fetch_index(&self, repo_url: &str) -> Result<ChartIndex, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(repo_url) {
            Some(Ok(body)) => ChartIndex::parse(body),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ResolveError::Status {
                status: 404,
                url: format!("{repo_url}/index.yaml"),
            }),
        }
    }
}

/// Registry search serving canned listings per reference.
#[derive(Default)]
pub struct StaticRegistrySearch {
    responses: HashMap<String, Result<Vec<SearchEntry>, ResolveError>>,
    calls: Arc<AtomicUsize>,
}

impl StaticRegistrySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions(self, reference: &str, versions: &[&str]) -> Self {
        let entries = versions.iter().map(|v| SearchEntry::new(v)).collect();
        self.with_entries(reference, entries)
    }

    pub fn with_entries(mut self, reference: &str, entries: Vec<SearchEntry>) -> Self {
        self.responses.insert(reference.to_owned(), Ok(entries));
        self
    }

    pub fn with_error(mut self, reference: &str, error: ResolveError) -> Self {
        self.responses.insert(reference.to_owned(), Err(error));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl RegistrySearch for StaticRegistrySearch {
    async fn search_versions(&self, reference: &str) -> Result<Vec<SearchEntry>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(reference) {
            Some(result) => result.clone(),
            None => Err(ResolveError::Process(format!(
                "exit status 1: no results for {reference}"
            ))),
        }
    }
}

/// What a [`CountingLookup`] does when called.
#[derive(Debug, Clone)]
pub enum LookupBehavior {
    Return(Vec<String>),
    Fail(ResolveError),
    Sleep(Duration, Vec<String>),
    Panic,
}

/// Version lookup with per-chart scripted behavior and a call counter.
pub struct CountingLookup {
    default: LookupBehavior,
    per_chart: HashMap<String, LookupBehavior>,
    calls: Arc<AtomicUsize>,
    in_flight: AtomicUsize,
    max_in_flight: Arc<AtomicUsize>,
}

impl CountingLookup {
    pub fn new(default: LookupBehavior) -> Self {
        Self {
            default,
            per_chart: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn returning(versions: Vec<String>) -> Self {
        Self::new(LookupBehavior::Return(versions))
    }

    pub fn failing(error: ResolveError) -> Self {
        Self::new(LookupBehavior::Fail(error))
    }

    /// Override the behavior for one chart name.
    pub fn with_chart(mut self, chart_name: &str, behavior: LookupBehavior) -> Self {
        self.per_chart.insert(chart_name.to_owned(), behavior);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Highest number of lookups observed running at the same time.
    pub fn max_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_in_flight)
    }
}

#[async_trait::async_trait]
impl VersionLookup for CountingLookup {
    async fn lookup(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let behavior = self
            .per_chart
            .get(&identity.chart_name)
            .unwrap_or(&self.default)
            .clone();

        let result = match behavior {
            LookupBehavior::Return(versions) => Ok(versions),
            LookupBehavior::Fail(error) => Err(error),
            LookupBehavior::Sleep(delay, versions) => {
                tokio::time::sleep(delay).await;
                Ok(versions)
            }
            LookupBehavior::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("lookup panicked for {}", identity.chart_name);
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
