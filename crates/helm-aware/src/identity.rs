use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scheme prefix that routes a chart to the OCI resolution path.
pub const OCI_SCHEME: &str = "oci://";

const EXPLICIT_SCHEMES: [&str; 3] = ["http://", "https://", OCI_SCHEME];

/// Read-only view of a single `source` block inside a resource document.
///
/// Anything that is not a map is still a valid block; it simply has no
/// fields.
#[derive(Debug, Clone, Copy)]
pub struct SourceBlock<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> SourceBlock<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self {
            fields: value.as_object(),
        }
    }

    /// Whether the block carries `name`, whatever its value.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.is_some_and(|fields| fields.contains_key(name))
    }

    /// Textual value of a field, or an empty string when it is absent or
    /// not a scalar.
    pub fn text(&self, name: &str) -> String {
        match self.fields.and_then(|fields| fields.get(name)) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Helm,
}

/// Canonical identity of a Helm chart referenced by a deployment source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartIdentity {
    /// Repository URL, always carrying an explicit scheme.
    pub repo_url: String,
    pub chart_name: String,
    pub chart_version: String,
    #[serde(default)]
    pub source_type: SourceType,
}

impl ChartIdentity {
    pub fn new(
        repo_url: impl AsRef<str>,
        chart_name: impl Into<String>,
        chart_version: impl Into<String>,
    ) -> Self {
        Self {
            repo_url: normalize_repo_url(repo_url.as_ref()),
            chart_name: chart_name.into(),
            chart_version: chart_version.into(),
            source_type: SourceType::Helm,
        }
    }

    /// Build an identity from a block that has already been classified as
    /// Helm-backed. Missing fields become empty strings.
    pub fn from_source(source: &SourceBlock<'_>) -> Self {
        Self::new(
            source.text("repoURL"),
            source.text("chart"),
            source.text("targetRevision"),
        )
    }

    pub fn is_oci(&self) -> bool {
        self.repo_url.starts_with(OCI_SCHEME)
    }
}

impl fmt::Display for ChartIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_url, self.chart_name)?;
        if !self.chart_version.is_empty() {
            write!(f, "@{}", self.chart_version)?;
        }
        Ok(())
    }
}

/// Prefix `oci://` onto repository URLs that carry no recognized scheme,
/// and drop trailing slashes after the scheme.
pub fn normalize_repo_url(repo_url: &str) -> String {
    let (scheme, rest) = match EXPLICIT_SCHEMES
        .iter()
        .find(|scheme| repo_url.starts_with(*scheme))
    {
        Some(scheme) => repo_url.split_at(scheme.len()),
        None => (OCI_SCHEME, repo_url),
    };
    format!("{scheme}{}", rest.trim_end_matches('/'))
}
