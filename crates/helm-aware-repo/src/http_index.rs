use std::time::Duration;

use helm_aware::{ChartIndex, IndexFetcher, ResolveError};
use tracing::debug;

/// Default bound on fetching a repository index.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches `index.yaml` from classic HTTP(S) chart repositories.
pub struct HttpIndexClient {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
}

impl HttpIndexClient {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.into(),
            timeout,
        }
    }

    /// `{repo_url}/index.yaml`, without doubling a trailing slash.
    pub fn index_url(repo_url: &str) -> String {
        format!("{}/index.yaml", repo_url.trim_end_matches('/'))
    }

    fn map_send_error(&self, error: reqwest::Error) -> ResolveError {
        if error.is_timeout() {
            ResolveError::Timeout(self.timeout)
        } else {
            ResolveError::Network(error.to_string())
        }
    }
}

impl Default for HttpIndexClient {
    fn default() -> Self {
        Self::new(
            concat!("helm-aware/", env!("CARGO_PKG_VERSION")),
            DEFAULT_HTTP_TIMEOUT,
        )
    }
}

#[async_trait::async_trait]
impl IndexFetcher for HttpIndexClient {
    async fn fetch_index(&self, repo_url: &str) -> Result<ChartIndex, ResolveError> {
        let url = Self::index_url(repo_url);
        debug!(url = %url, "fetching chart index");

        let response = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(ResolveError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        ChartIndex::parse(&body)
    }
}
