use std::process::Stdio;
use std::time::Duration;

use helm_aware::index::parse_search_output;
use helm_aware::{RegistrySearch, ResolveError, SearchEntry};
use tracing::debug;

/// Default bound on a single `helm search` invocation.
pub const DEFAULT_OCI_TIMEOUT: Duration = Duration::from_secs(30);

/// Searches chart registries by running the `helm` binary.
///
/// The child process is killed if the search times out or the future is
/// dropped.
pub struct HelmCliSearch {
    binary: String,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl HelmCliSearch {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            leading_args: Vec::new(),
            timeout,
        }
    }

    /// Arguments placed before `search`, e.g. global helm flags.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    fn search_args<'a>(&'a self, reference: &'a str) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.leading_args.iter().map(String::as_str).collect();
        args.extend([
            "search",
            "repo",
            reference,
            "--versions",
            "--output",
            "json",
        ]);
        args
    }
}

impl Default for HelmCliSearch {
    fn default() -> Self {
        Self::new("helm", DEFAULT_OCI_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl RegistrySearch for HelmCliSearch {
    async fn search_versions(&self, reference: &str) -> Result<Vec<SearchEntry>, ResolveError> {
        let args = self.search_args(reference);
        debug!(binary = %self.binary, args = ?args, "running chart search");

        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result
                .map_err(|e| ResolveError::Process(format!("failed to run {}: {e}", self.binary)))?,
            Err(_) => return Err(ResolveError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(ResolveError::Process(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_search_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_search_arguments() {
        let search = HelmCliSearch::default();
        assert_eq!(search.search_args("ghcr.io/org/app"), vec![
            "search",
            "repo",
            "ghcr.io/org/app",
            "--versions",
            "--output",
            "json",
        ]);
    }

    #[test]
    fn leading_args_come_first() {
        let search = HelmCliSearch::default()
            .with_leading_args(vec!["--registry-config".into(), "/tmp/r.json".into()]);
        let args = search.search_args("ghcr.io/org/app");
        assert_eq!(&args[..3], &["--registry-config", "/tmp/r.json", "search"]);
    }
}
