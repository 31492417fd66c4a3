//! Bounded-parallelism resolution of many charts at once.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::identity::ChartIdentity;
use crate::resolver::VersionLookup;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One chart to resolve, tagged with a caller-chosen id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub chart_id: String,
    pub repo_url: String,
    pub chart_name: String,
    #[serde(default)]
    pub chart_version: String,
}

impl BatchRequest {
    pub fn new(chart_id: impl Into<String>, identity: &ChartIdentity) -> Self {
        Self {
            chart_id: chart_id.into(),
            repo_url: identity.repo_url.clone(),
            chart_name: identity.chart_name.clone(),
            chart_version: identity.chart_version.clone(),
        }
    }

    pub fn identity(&self) -> ChartIdentity {
        ChartIdentity::new(&self.repo_url, &self.chart_name, &self.chart_version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Versions were obtained; the list may be empty.
    Success,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub chart_id: String,
    pub versions: Vec<String>,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    fn success(chart_id: String, versions: Vec<String>) -> Self {
        Self {
            chart_id,
            versions,
            status: BatchStatus::Success,
            error: None,
        }
    }

    fn failed(chart_id: String, status: BatchStatus, error: String) -> Self {
        Self {
            chart_id,
            versions: Vec::new(),
            status,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum number of resolutions in flight.
    pub concurrency: usize,
    /// Bound on a single resolution, counted from when it gets a worker slot.
    pub item_timeout: Duration,
    /// Bound on the whole batch.
    pub overall_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
        }
    }
}

enum Outcome {
    Resolved(Vec<String>),
    Failed(String),
    TimedOut(String),
}

/// Aborts the wrapped task when dropped, so resolutions abandoned by a
/// timeout or by the batch deadline do not keep running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolve every request and return exactly one result per request, in
/// request order.
///
/// A slow or failing item never holds back the others; anything still
/// unresolved when `overall_timeout` elapses is reported as a timeout and
/// its task is cancelled.
pub async fn resolve_batch(
    lookup: Arc<dyn VersionLookup>,
    requests: Vec<BatchRequest>,
    options: &BatchOptions,
) -> Vec<BatchResult> {
    let deadline = Instant::now() + options.overall_timeout;
    let semaphore = Arc::new(Semaphore::new(
        options.concurrency.clamp(1, Semaphore::MAX_PERMITS),
    ));
    let mut tasks = JoinSet::new();

    for (index, request) in requests.iter().enumerate() {
        let lookup = Arc::clone(&lookup);
        let semaphore = Arc::clone(&semaphore);
        let identity = request.identity();
        let item_timeout = options.item_timeout;

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, Outcome::Failed("worker pool closed".into()));
            };

            debug!(chart = %identity, "resolving");
            let mut worker = AbortOnDrop(tokio::spawn(async move {
                lookup.lookup(&identity).await
            }));

            let outcome = match tokio::time::timeout(item_timeout, &mut worker.0).await {
                Ok(Ok(Ok(versions))) => Outcome::Resolved(versions),
                Ok(Ok(Err(e))) => Outcome::Failed(e.to_string()),
                Ok(Err(e)) => Outcome::Failed(format!("resolution task failed: {e}")),
                Err(_) => Outcome::TimedOut(format!(
                    "resolution exceeded {}s",
                    item_timeout.as_secs_f64()
                )),
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<Outcome>> = requests.iter().map(|_| None).collect();

    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok((index, outcome)))) => outcomes[index] = Some(outcome),
            Ok(Some(Err(e))) => {
                // The outer task only awaits; losing one leaves its slot unset.
                warn!(error = %e, "batch task ended unexpectedly");
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    pending = tasks.len(),
                    "batch deadline exceeded, cancelling remaining resolutions"
                );
                tasks.abort_all();
                break;
            }
        }
    }

    let overall = options.overall_timeout.as_secs_f64();
    let results: Vec<BatchResult> = requests
        .into_iter()
        .zip(outcomes)
        .map(|(request, outcome)| match outcome {
            Some(Outcome::Resolved(versions)) => BatchResult::success(request.chart_id, versions),
            Some(Outcome::Failed(e)) => BatchResult::failed(request.chart_id, BatchStatus::Error, e),
            Some(Outcome::TimedOut(e)) => {
                BatchResult::failed(request.chart_id, BatchStatus::Timeout, e)
            }
            None if tasks.is_empty() && Instant::now() < deadline => BatchResult::failed(
                request.chart_id,
                BatchStatus::Error,
                "resolution task was lost".into(),
            ),
            None => BatchResult::failed(
                request.chart_id,
                BatchStatus::Timeout,
                format!("batch did not settle within {overall}s"),
            ),
        })
        .collect();

    let succeeded = results
        .iter()
        .filter(|r| r.status == BatchStatus::Success)
        .count();
    info!(
        total = results.len(),
        succeeded,
        failed = results.len() - succeeded,
        "batch resolution finished"
    );

    results
}
