use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::classify::is_helm_source;
use crate::identity::{ChartIdentity, SourceBlock};

/// The ArgoCD resource kinds that can carry deployment sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResourceKind {
    Application,
    ApplicationSet,
    Other(String),
}

impl ResourceKind {
    pub fn of(document: &Value) -> Self {
        match document.get("kind").and_then(Value::as_str) {
            Some("Application") => Self::Application,
            Some("ApplicationSet") => Self::ApplicationSet,
            Some(other) => Self::Other(other.to_owned()),
            None => Self::Other(String::new()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => f.write_str("Application"),
            Self::ApplicationSet => f.write_str("ApplicationSet"),
            Self::Other(kind) if kind.is_empty() => f.write_str("<unknown>"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Who a set of charts belongs to, taken from the document's `metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn of(document: &Value) -> Self {
        let metadata = document.get("metadata");
        let field = |name: &str| {
            metadata
                .and_then(|m| m.get(name))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        Self {
            kind: ResourceKind::of(document),
            name: field("name").unwrap_or_else(|| "unknown".into()),
            namespace: field("namespace"),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A resource together with the Helm charts it deploys.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedResource {
    pub resource: ResourceRef,
    pub charts: Vec<ChartIdentity>,
}

/// Every source block of a document, in document order.
///
/// Applications keep their sources under `spec`; ApplicationSets under
/// `spec.template.spec`. The singular `source` comes before the elements of
/// `sources`, and both are returned when both are present.
pub fn source_blocks(document: &Value) -> Vec<SourceBlock<'_>> {
    let spec = match ResourceKind::of(document) {
        ResourceKind::Application => document.get("spec"),
        ResourceKind::ApplicationSet => document
            .get("spec")
            .and_then(|s| s.get("template"))
            .and_then(|t| t.get("spec")),
        ResourceKind::Other(kind) => {
            debug!(kind = %kind, "resource kind carries no sources");
            None
        }
    };

    let Some(spec) = spec else {
        return Vec::new();
    };

    let mut blocks = Vec::new();

    if let Some(source) = spec.get("source") {
        blocks.push(SourceBlock::new(source));
    }

    if let Some(sources) = spec.get("sources").and_then(Value::as_array) {
        blocks.extend(sources.iter().map(SourceBlock::new));
    }

    blocks
}

/// Chart identities of all Helm-backed sources in a document.
pub fn helm_charts(document: &Value) -> Vec<ChartIdentity> {
    source_blocks(document)
        .iter()
        .filter(|block| is_helm_source(block))
        .map(ChartIdentity::from_source)
        .collect()
}

pub fn analyze(document: &Value) -> AnalyzedResource {
    let resource = ResourceRef::of(document);
    let charts = helm_charts(document);
    debug!(resource = %resource, charts = charts.len(), "analyzed resource");
    AnalyzedResource { resource, charts }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn application_set_with_mixed_sources() {
        let document = json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "ApplicationSet",
            "metadata": { "name": "web", "namespace": "argocd" },
            "spec": {
                "template": {
                    "spec": {
                        "sources": [
                            {
                                "chart": "nginx",
                                "repoURL": "https://charts.bitnami.com/bitnami",
                                "targetRevision": "13.2.0",
                            },
                            { "repoURL": "https://github.com/org/repo.git" },
                        ]
                    }
                }
            }
        });

        let charts = helm_charts(&document);
        assert_eq!(charts, vec![ChartIdentity::new(
            "https://charts.bitnami.com/bitnami",
            "nginx",
            "13.2.0",
        )]);
    }

    #[test]
    fn application_single_and_multiple_sources_are_both_read() {
        let document = json!({
            "kind": "Application",
            "spec": {
                "source": { "chart": "first", "repoURL": "https://a.example" },
                "sources": [
                    { "chart": "second", "repoURL": "https://b.example" },
                    { "path": "manifests", "repoURL": "https://github.com/org/repo.git" },
                    { "helm": {}, "repoURL": "ghcr.io/org/charts" },
                ],
            }
        });

        let names: Vec<_> = helm_charts(&document)
            .into_iter()
            .map(|c| (c.chart_name, c.repo_url))
            .collect();
        assert_eq!(names, vec![
            ("first".to_owned(), "https://a.example".to_owned()),
            ("second".to_owned(), "https://b.example".to_owned()),
            (String::new(), "oci://ghcr.io/org/charts".to_owned()),
        ]);
    }

    #[test]
    fn application_set_ignores_top_level_spec_sources() {
        let document = json!({
            "kind": "ApplicationSet",
            "spec": {
                "source": { "chart": "wrong-depth", "repoURL": "https://a.example" },
                "template": { "spec": { "source": { "chart": "right", "repoURL": "https://a.example" } } },
            }
        });

        let charts = helm_charts(&document);
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].chart_name, "right");
    }

    #[test]
    fn application_ignores_template_nesting() {
        let document = json!({
            "kind": "Application",
            "spec": { "template": { "spec": { "source": { "chart": "nested" } } } }
        });
        assert!(helm_charts(&document).is_empty());
    }

    #[test]
    fn unknown_kind_yields_nothing() {
        let document = json!({
            "kind": "Deployment",
            "spec": { "source": { "chart": "nginx" } }
        });
        assert!(source_blocks(&document).is_empty());
        assert_eq!(ResourceKind::of(&document), ResourceKind::Other("Deployment".into()));
    }

    #[test]
    fn non_sequence_sources_are_skipped() {
        let document = json!({
            "kind": "Application",
            "spec": { "sources": { "chart": "not-a-list" } }
        });
        assert!(helm_charts(&document).is_empty());
    }

    #[test]
    fn resource_ref_reads_metadata() {
        let document = json!({
            "kind": "Application",
            "metadata": { "name": "api", "namespace": "argocd" },
        });
        let resource = ResourceRef::of(&document);
        assert_eq!(resource.name, "api");
        assert_eq!(resource.namespace.as_deref(), Some("argocd"));
        assert_eq!(resource.to_string(), "Application argocd/api");
    }

    #[test]
    fn resource_ref_defaults_name() {
        let resource = ResourceRef::of(&json!({ "kind": "ApplicationSet" }));
        assert_eq!(resource.name, "unknown");
        assert_eq!(resource.to_string(), "ApplicationSet unknown");
    }

    #[test]
    fn analyze_pairs_resource_with_charts() {
        let document = json!({
            "kind": "Application",
            "metadata": { "name": "db" },
            "spec": { "source": { "chart": "postgresql", "repoURL": "registry-1.docker.io/bitnamicharts" } }
        });

        let analyzed = analyze(&document);
        assert_eq!(analyzed.resource.name, "db");
        assert_eq!(analyzed.charts.len(), 1);
        assert!(analyzed.charts[0].is_oci());
    }
}
