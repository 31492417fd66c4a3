use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::identity::{ChartIdentity, OCI_SCHEME};
use crate::index::{ChartIndex, SearchEntry};

/// Errors that can occur while looking up published chart versions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("process error: {0}")]
    Process(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Fetches and parses a chart repository's `index.yaml`.
#[async_trait::async_trait]
pub trait IndexFetcher: Send + Sync {
    async fn fetch_index(&self, repo_url: &str) -> Result<ChartIndex, ResolveError>;
}

/// Lists the published versions of a chart in an OCI registry.
///
/// `reference` is the registry path without scheme, chart name included
/// (e.g. `ghcr.io/org/charts/app`).
#[async_trait::async_trait]
pub trait RegistrySearch: Send + Sync {
    async fn search_versions(&self, reference: &str) -> Result<Vec<SearchEntry>, ResolveError>;
}

/// Anything that can produce the version list of a chart identity.
#[async_trait::async_trait]
pub trait VersionLookup: Send + Sync {
    async fn lookup(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError>;
}

#[async_trait::async_trait]
impl<T: VersionLookup + ?Sized> VersionLookup for Arc<T> {
    async fn lookup(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        (**self).lookup(identity).await
    }
}

/// Resolves available chart versions over the OCI or HTTP path depending on
/// the identity's repository scheme.
pub struct VersionResolver {
    index: Arc<dyn IndexFetcher>,
    registry: Arc<dyn RegistrySearch>,
}

impl VersionResolver {
    pub fn new(index: Arc<dyn IndexFetcher>, registry: Arc<dyn RegistrySearch>) -> Self {
        Self { index, registry }
    }

    /// Available versions, newest-first by string order. Failures are logged
    /// and come back as an empty list.
    pub async fn versions(&self, identity: &ChartIdentity) -> Vec<String> {
        match self.lookup(identity).await {
            Ok(versions) => versions,
            Err(e) => {
                warn!(
                    repo_url = %identity.repo_url,
                    chart = %identity.chart_name,
                    error = %e,
                    "version lookup failed"
                );
                Vec::new()
            }
        }
    }

    async fn oci_versions(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        let reference = oci_reference(identity);
        debug!(reference = %reference, "searching OCI registry");

        let entries = self.registry.search_versions(&reference).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.version().map(str::to_owned))
            .collect())
    }

    async fn http_versions(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        debug!(repo_url = %identity.repo_url, "fetching repository index");

        let index = self.index.fetch_index(&identity.repo_url).await?;
        match index.versions_of(&identity.chart_name) {
            Some(versions) => Ok(versions),
            None => {
                warn!(
                    repo_url = %identity.repo_url,
                    chart = %identity.chart_name,
                    "chart not found in repository index"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait::async_trait]
impl VersionLookup for VersionResolver {
    async fn lookup(&self, identity: &ChartIdentity) -> Result<Vec<String>, ResolveError> {
        let mut versions = if identity.is_oci() {
            self.oci_versions(identity).await?
        } else {
            self.http_versions(identity).await?
        };

        sort_descending(&mut versions);
        info!(
            repo_url = %identity.repo_url,
            chart = %identity.chart_name,
            count = versions.len(),
            "resolved chart versions"
        );
        Ok(versions)
    }
}

/// Registry reference for the OCI path: scheme stripped, chart appended.
pub fn oci_reference(identity: &ChartIdentity) -> String {
    let registry = identity
        .repo_url
        .strip_prefix(OCI_SCHEME)
        .unwrap_or(&identity.repo_url);
    format!("{registry}/{}", identity.chart_name)
}

/// Sort versions in descending string order.
///
/// This is plain lexicographic order, not semantic-version order:
/// `1.9.0` sorts above `1.10.0`.
pub fn sort_descending(versions: &mut [String]) {
    versions.sort_unstable_by(|a, b| b.cmp(a));
}

/// The first version in descending string order, if any.
pub fn latest(versions: &[String]) -> Option<&str> {
    versions.iter().max().map(String::as_str)
}
