//! Wire formats of the two places chart versions come from: a repository's
//! `index.yaml` and the JSON listing printed by `helm search`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::resolver::ResolveError;

/// A chart repository `index.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartIndex {
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartRelease>>,
}

/// One published release of a chart. Only the version is modeled.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChartRelease {
    #[serde(default)]
    pub version: Option<serde_yaml_ng::Value>,
}

impl ChartRelease {
    /// The release version as text. Unquoted numeric versions such as
    /// `version: 2` are accepted.
    pub fn version(&self) -> Option<String> {
        match self.version.as_ref()? {
            serde_yaml_ng::Value::String(s) => Some(s.clone()),
            serde_yaml_ng::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl ChartIndex {
    pub fn parse(body: &str) -> Result<Self, ResolveError> {
        let index: Option<ChartIndex> = serde_yaml_ng::from_str(body)
            .map_err(|e| ResolveError::Parse(format!("invalid index.yaml: {e}")))?;
        // An empty document parses to null; treat it like an empty index.
        Ok(index.unwrap_or_default())
    }

    /// Versions published for `chart_name`, in index order, or `None` when
    /// the index has no entry for it.
    pub fn versions_of(&self, chart_name: &str) -> Option<Vec<String>> {
        self.entries.get(chart_name).map(|releases| {
            releases
                .iter()
                .filter_map(ChartRelease::version)
                .collect()
        })
    }
}

/// One row of `helm search ... --output json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<serde_json::Value>,
}

impl SearchEntry {
    pub fn new(version: &str) -> Self {
        Self {
            name: None,
            version: Some(serde_json::Value::String(version.to_owned())),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_ref().and_then(serde_json::Value::as_str)
    }
}

pub fn parse_search_output(stdout: &[u8]) -> Result<Vec<SearchEntry>, ResolveError> {
    serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::Parse(format!("invalid search output: {e}")))
}
