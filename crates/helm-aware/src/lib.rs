pub mod batch;
pub mod cache;
pub mod cas;
pub mod classify;
pub mod identity;
pub mod index;
pub mod manifest;
pub mod record;
pub mod resolver;

pub use batch::{BatchOptions, BatchRequest, BatchResult, BatchStatus, resolve_batch};
pub use cache::{CacheEntry, CacheKey, CacheMetadata, CachedResolver, VersionCache};
pub use cas::{CasError, update_record};
pub use classify::is_helm_source;
pub use identity::{ChartIdentity, SourceBlock, SourceType};
pub use index::{ChartIndex, SearchEntry};
pub use manifest::{AnalyzedResource, ResourceKind, ResourceRef, analyze, helm_charts};
pub use record::{
    DeleteOutcome, RecordEntries, RecordStore, RecordStoreError, Revision, StoredRecord,
    WriteOutcome,
};
pub use resolver::{
    IndexFetcher, RegistrySearch, ResolveError, VersionLookup, VersionResolver, latest,
};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
