use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cas::{self, CasError};
use crate::identity::ChartIdentity;
use crate::record::{DeleteOutcome, RecordStore};
use crate::resolver::{ResolveError, VersionLookup};

/// Record that holds every cached chart when no other name is configured.
pub const DEFAULT_RECORD_ID: &str = "helm-chart-versions-cache";

/// Attempts per `set` before a conflicting write is given up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Storage key of a chart inside the cache record.
///
/// Built from `repo_url:chart_name` with every character outside
/// `[A-Za-z0-9._-]` replaced by `_`. Distinct identities can map to the same
/// key (`https://a/b` + `c` and `https://a_b` + `c` both become
/// `https___a_b_c`), in which case they share one cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_chart(identity: &ChartIdentity) -> Self {
        let raw = format!("{}:{}", identity.repo_url, identity.chart_name);
        Self(
            raw.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached resolution of one chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub versions: Vec<String>,
    pub last_update: DateTime<Utc>,
}

/// Record-level facts about the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheMetadata {
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
}

/// Chart version cache over a single shared record.
///
/// Every failure is logged and reported as a miss or a `false`; none is
/// raised to the caller.
#[derive(Clone)]
pub struct VersionCache {
    store: Arc<dyn RecordStore>,
    record_id: String,
    max_attempts: u32,
}

impl VersionCache {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            record_id: DEFAULT_RECORD_ID.to_owned(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = record_id.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub async fn get(&self, identity: &ChartIdentity) -> Option<CacheEntry> {
        let key = CacheKey::for_chart(identity);

        let record = match self.store.read(&self.record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(record_id = %self.record_id, "cache record not found");
                return None;
            }
            Err(e) => {
                error!(record_id = %self.record_id, error = %e, "failed to read cache record");
                return None;
            }
        };

        let Some(raw) = record.entries.get(key.as_str()) else {
            debug!(%key, "cache miss");
            return None;
        };

        match serde_json::from_str::<CacheEntry>(raw) {
            Ok(entry) => {
                debug!(%key, versions = entry.versions.len(), "cache hit");
                Some(entry)
            }
            Err(e) => {
                warn!(%key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store `versions` for `identity`, stamped with the current time.
    pub async fn set(&self, identity: &ChartIdentity, versions: &[String]) -> bool {
        self.set_at(identity, versions, Utc::now()).await
    }

    pub async fn set_at(
        &self,
        identity: &ChartIdentity,
        versions: &[String],
        last_update: DateTime<Utc>,
    ) -> bool {
        let key = CacheKey::for_chart(identity);
        let entry = CacheEntry {
            versions: versions.to_vec(),
            last_update,
        };

        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                error!(%key, error = %e, "failed to serialize cache entry");
                return false;
            }
        };

        let result = cas::update_record(
            self.store.as_ref(),
            &self.record_id,
            self.max_attempts,
            |entries| {
                entries.insert(key.as_str().to_owned(), serialized.clone());
            },
        )
        .await;

        match result {
            Ok(revision) => {
                debug!(%key, %revision, "cached chart versions");
                true
            }
            Err(CasError::Exhausted { attempts, .. }) => {
                error!(%key, attempts, "failed to update cache record after retries");
                false
            }
            Err(CasError::Store(e)) => {
                error!(%key, error = %e, "failed to update cache record");
                false
            }
        }
    }

    pub async fn metadata(&self) -> Option<CacheMetadata> {
        match self.store.read(&self.record_id).await {
            Ok(Some(record)) => Some(CacheMetadata {
                created_at: record.created_at,
                entry_count: record.entries.len(),
            }),
            Ok(None) => None,
            Err(e) => {
                error!(record_id = %self.record_id, error = %e, "failed to read cache metadata");
                None
            }
        }
    }

    /// Delete every cached chart. An already absent record counts as cleared.
    pub async fn clear(&self) -> bool {
        match self.store.delete(&self.record_id).await {
            Ok(DeleteOutcome::Deleted) => {
                info!(record_id = %self.record_id, "cache cleared");
                true
            }
            Ok(DeleteOutcome::NotFound) => {
                info!(record_id = %self.record_id, "cache was already empty");
                true
            }
            Err(e) => {
                error!(record_id = %self.record_id, error = %e, "failed to clear cache");
                false
            }
        }
    }
}

/// Cache-aware lookup: answers from the cache when it can, otherwise asks
/// the inner lookup and writes successful results back.
pub struct CachedResolver {
    inner: Arc<dyn VersionLookup>,
    cache: VersionCache,
    force_refresh: bool,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn VersionLookup>, cache: VersionCache) -> Self {
        Self {
            inner,
            cache,
            force_refresh: false,
        }
    }

    /// Make every `lookup` behave like [`CachedResolver::refresh`].
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn cache(&self) -> &VersionCache {
        &self.cache
    }

    /// Resolve from the remote repository and overwrite the cached entry,
    /// ignoring whatever the cache currently holds.
    pub async fn refresh(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        let versions = self.inner.lookup(identity).await?;
        if !self.cache.set(identity, &versions).await {
            warn!(chart = %identity, "continuing without cache write");
        }
        Ok(versions)
    }
}

#[async_trait::async_trait]
impl VersionLookup for CachedResolver {
    async fn lookup(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        if !self.force_refresh
            && let Some(entry) = self.cache.get(identity).await
        {
            return Ok(entry.versions);
        }
        self.refresh(identity).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::TimeZone;

    use crate::record::RecordStore;
    use crate::test_support::{CountingLookup, InMemoryRecordStore};

    use super::*;

    fn identity(repo_url: &str, chart: &str) -> ChartIdentity {
        ChartIdentity::new(repo_url, chart, "")
    }

    fn owned(versions: &[&str]) -> Vec<String> {
        versions.iter().map(|v| (*v).to_owned()).collect()
    }

    fn cache_with(store: &Arc<InMemoryRecordStore>) -> VersionCache {
        VersionCache::new(Arc::clone(store) as Arc<dyn RecordStore>)
    }

    #[test]
    fn key_replaces_unsafe_characters() {
        let key = CacheKey::for_chart(&identity("https://charts.bitnami.com/bitnami", "nginx"));
        assert_eq!(key.as_str(), "https___charts.bitnami.com_bitnami_nginx");
    }

    #[test]
    fn key_keeps_safe_punctuation() {
        let key = CacheKey::for_chart(&identity("oci://ghcr.io/my-org/charts_v2", "app.x"));
        assert_eq!(key.as_str(), "oci___ghcr.io_my-org_charts_v2_app.x");
    }

    #[test]
    fn key_replaces_non_ascii_per_character() {
        let key = CacheKey::for_chart(&identity("https://chärts.example", "é"));
        assert_eq!(key.as_str(), "https___ch_rts.example__");
    }

    #[test]
    fn distinct_identities_can_share_a_key() {
        let a = identity("https://example.com/a", "b");
        let b = identity("https://example.com:a", "b");
        assert_ne!(a, b);
        assert_eq!(CacheKey::for_chart(&a), CacheKey::for_chart(&b));
    }

    #[test]
    fn trailing_slash_does_not_change_the_key() {
        assert_eq!(
            CacheKey::for_chart(&identity("https://charts.example.com/", "app")),
            CacheKey::for_chart(&identity("https://charts.example.com", "app"))
        );
    }

    #[tokio::test]
    async fn colliding_identities_overwrite_each_other() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);

        let a = identity("https://example.com/a", "b");
        let b = identity("https://example.com:a", "b");

        assert!(cache.set(&a, &owned(&["1.0.0"])).await);
        assert!(cache.set(&b, &owned(&["9.9.9"])).await);

        assert_eq!(cache.get(&a).await.unwrap().versions, owned(&["9.9.9"]));
        assert_eq!(cache.metadata().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert!(cache.set_at(&chart, &owned(&["1.0.0", "2.0.0"]), stamp).await);

        let entry = cache.get(&chart).await.unwrap();
        assert_eq!(entry.versions, owned(&["1.0.0", "2.0.0"]));
        assert_eq!(entry.last_update, stamp);
    }

    #[tokio::test]
    async fn get_misses_without_record_or_key() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");

        assert!(cache.get(&chart).await.is_none());

        cache.set(&identity("https://charts.example.com", "other"), &[]).await;
        assert!(cache.get(&chart).await.is_none());
    }

    #[tokio::test]
    async fn get_treats_read_failure_as_miss() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");
        cache.set(&chart, &owned(&["1.0.0"])).await;

        store.set_unavailable(true);
        assert!(cache.get(&chart).await.is_none());
        assert!(cache.metadata().await.is_none());
    }

    #[tokio::test]
    async fn get_discards_corrupt_entry() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");
        let key = CacheKey::for_chart(&chart);

        cas::update_record(store.as_ref(), DEFAULT_RECORD_ID, 3, |entries| {
            entries.insert(key.as_str().to_owned(), "not json".into());
        })
        .await
        .unwrap();

        assert!(cache.get(&chart).await.is_none());
    }

    #[tokio::test]
    async fn set_overwrites_existing_entry() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");

        cache.set(&chart, &owned(&["1.0.0"])).await;
        cache.set(&chart, &owned(&["2.0.0", "1.0.0"])).await;

        assert_eq!(cache.get(&chart).await.unwrap().versions, owned(&["2.0.0", "1.0.0"]));
        assert_eq!(cache.metadata().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn set_survives_conflicts_within_bound() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");

        store.inject_conflicts(2);
        assert!(cache.set(&chart, &owned(&["1.0.0"])).await);
        assert!(cache.get(&chart).await.is_some());
    }

    #[tokio::test]
    async fn set_reports_failure_when_conflicts_exhaust_attempts() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");

        store.inject_conflicts(3);
        assert!(!cache.set(&chart, &owned(&["1.0.0"])).await);
        assert!(cache.get(&chart).await.is_none());
    }

    #[tokio::test]
    async fn max_attempts_is_configurable() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store).with_max_attempts(5);
        let chart = identity("https://charts.example.com", "app");

        store.inject_conflicts(4);
        assert!(cache.set(&chart, &owned(&["1.0.0"])).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_on_different_keys_all_land() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);

        let mut handles = Vec::new();
        for n in 0..3 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let chart = identity("https://charts.example.com", &format!("chart-{n}"));
                cache.set(&chart, &[format!("{n}.0.0")]).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(cache.metadata().await.unwrap().entry_count, 3);
        for n in 0..3 {
            let chart = identity("https://charts.example.com", &format!("chart-{n}"));
            assert_eq!(cache.get(&chart).await.unwrap().versions, vec![format!("{n}.0.0")]);
        }
    }

    #[tokio::test]
    async fn metadata_reflects_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        assert!(cache.metadata().await.is_none());

        cache.set(&identity("https://a.example", "x"), &[]).await;
        cache.set(&identity("https://a.example", "y"), &[]).await;

        let metadata = cache.metadata().await.unwrap();
        assert_eq!(metadata.entry_count, 2);
        assert!(metadata.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        assert!(cache.clear().await);

        let chart = identity("https://charts.example.com", "app");
        cache.set(&chart, &owned(&["1.0.0"])).await;
        assert!(cache.clear().await);
        assert!(cache.get(&chart).await.is_none());
        assert!(cache.clear().await);
    }

    #[tokio::test]
    async fn clear_reports_backend_failure() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        store.set_unavailable(true);
        assert!(!cache.clear().await);
    }

    #[tokio::test]
    async fn record_id_is_configurable() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store).with_record_id("team-a");
        cache.set(&identity("https://a.example", "x"), &[]).await;

        assert!(store.read("team-a").await.unwrap().is_some());
        assert!(store.read(DEFAULT_RECORD_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cached_resolver_uses_cache_after_first_lookup() {
        let store = Arc::new(InMemoryRecordStore::new());
        let inner = Arc::new(CountingLookup::returning(owned(&["2.0.0", "1.0.0"])));
        let resolver = CachedResolver::new(inner.clone(), cache_with(&store));
        let chart = identity("https://charts.example.com", "app");

        assert_eq!(resolver.lookup(&chart).await.unwrap(), owned(&["2.0.0", "1.0.0"]));
        assert_eq!(resolver.lookup(&chart).await.unwrap(), owned(&["2.0.0", "1.0.0"]));
        assert_eq!(inner.calls().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_resolver_serves_preloaded_entry_without_remote_call() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");
        cache.set(&chart, &owned(&["1.0.0", "2.0.0"])).await;

        let inner = Arc::new(CountingLookup::returning(owned(&["9.9.9"])));
        let resolver = CachedResolver::new(inner.clone(), cache);

        assert_eq!(resolver.lookup(&chart).await.unwrap(), owned(&["1.0.0", "2.0.0"]));
        assert_eq!(inner.calls().load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cached_resolver_does_not_cache_failures() {
        let store = Arc::new(InMemoryRecordStore::new());
        let inner = Arc::new(CountingLookup::failing(ResolveError::Network("refused".into())));
        let resolver = CachedResolver::new(inner.clone(), cache_with(&store));
        let chart = identity("https://charts.example.com", "app");

        assert!(resolver.lookup(&chart).await.is_err());
        assert!(resolver.lookup(&chart).await.is_err());
        assert_eq!(inner.calls().load(Ordering::SeqCst), 2);
        assert!(resolver.cache().get(&chart).await.is_none());
    }

    #[tokio::test]
    async fn cached_resolver_caches_empty_success() {
        let store = Arc::new(InMemoryRecordStore::new());
        let inner = Arc::new(CountingLookup::returning(Vec::new()));
        let resolver = CachedResolver::new(inner.clone(), cache_with(&store));
        let chart = identity("https://charts.example.com", "app");

        assert!(resolver.lookup(&chart).await.unwrap().is_empty());
        assert!(resolver.lookup(&chart).await.unwrap().is_empty());
        assert_eq!(inner.calls().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_resolver_proceeds_when_cache_write_fails() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_unavailable(true);
        let inner = Arc::new(CountingLookup::returning(owned(&["1.0.0"])));
        let resolver = CachedResolver::new(inner, cache_with(&store));

        let chart = identity("https://charts.example.com", "app");
        assert_eq!(resolver.lookup(&chart).await.unwrap(), owned(&["1.0.0"]));
    }

    #[tokio::test]
    async fn refresh_overwrites_cached_entry() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");
        cache.set(&chart, &owned(&["1.0.0"])).await;

        let inner = Arc::new(CountingLookup::returning(owned(&["2.0.0", "1.0.0"])));
        let resolver = CachedResolver::new(inner.clone(), cache);

        assert_eq!(resolver.refresh(&chart).await.unwrap(), owned(&["2.0.0", "1.0.0"]));
        assert_eq!(inner.calls().load(Ordering::SeqCst), 1);
        assert_eq!(
            resolver.cache().get(&chart).await.unwrap().versions,
            owned(&["2.0.0", "1.0.0"])
        );
    }

    #[tokio::test]
    async fn force_refresh_skips_cached_entry() {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = cache_with(&store);
        let chart = identity("https://charts.example.com", "app");
        cache.set(&chart, &owned(&["1.0.0"])).await;

        let inner = Arc::new(CountingLookup::returning(owned(&["2.0.0"])));
        let resolver = CachedResolver::new(inner.clone(), cache).with_force_refresh(true);

        assert_eq!(resolver.lookup(&chart).await.unwrap(), owned(&["2.0.0"]));
        assert_eq!(resolver.lookup(&chart).await.unwrap(), owned(&["2.0.0"]));
        assert_eq!(inner.calls().load(Ordering::SeqCst), 2);
        assert_eq!(
            resolver.cache().get(&chart).await.unwrap().versions,
            owned(&["2.0.0"])
        );
    }
}
