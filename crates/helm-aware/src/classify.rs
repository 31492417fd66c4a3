use crate::identity::SourceBlock;

/// Whether a source block references a Helm chart.
///
/// A block is Helm-backed exactly when it has a `chart` or a `helm` field.
/// Repository URL shape, target revision and the parent resource's
/// configuration play no part.
pub fn is_helm_source(source: &SourceBlock<'_>) -> bool {
    source.has_field("chart") || source.has_field("helm")
}
