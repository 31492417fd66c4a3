use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// A manifest document and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub origin: String,
    pub document: Value,
}

/// Parse a YAML stream into documents. Empty documents are skipped and
/// `*List` wrappers are replaced by their `items`.
pub fn parse_documents(text: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for (index, doc) in serde_yaml_ng::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(doc)
            .with_context(|| format!("invalid YAML in document {}", index + 1))?;
        flatten(value, &mut documents);
    }
    Ok(documents)
}

fn flatten(value: Value, out: &mut Vec<Value>) {
    if value.is_null() {
        return;
    }

    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"));

    match value {
        Value::Object(mut map) if is_list && map.get("items").is_some_and(Value::is_array) => {
            if let Some(Value::Array(items)) = map.remove("items") {
                for item in items {
                    flatten(item, out);
                }
            }
        }
        other => out.push(other),
    }
}

fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read manifests from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Load every document from `paths` (`-` is stdin). Unreadable or invalid
/// files are skipped with a warning; it is an error only when all fail.
pub fn load(paths: &[PathBuf]) -> Result<Vec<LoadedDocument>> {
    let mut loaded = Vec::new();
    let mut failed = 0usize;

    for path in paths {
        let origin = if path == Path::new("-") {
            "<stdin>".to_owned()
        } else {
            path.display().to_string()
        };

        match read_source(path).and_then(|text| parse_documents(&text)) {
            Ok(documents) => loaded.extend(documents.into_iter().map(|document| LoadedDocument {
                origin: origin.clone(),
                document,
            })),
            Err(e) => {
                eprintln!("warning: skipping {origin}: {e:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 && failed == paths.len() {
        anyhow::bail!("none of the {failed} manifest inputs could be loaded");
    }

    Ok(loaded)
}
