use std::sync::Arc;

use anyhow::{Context, Result};
use helm_aware::{BatchOptions, BatchRequest, BatchResult, VersionLookup, resolve_batch};

/// Parse a JSON array of batch requests.
pub fn parse_requests(input: &str) -> Result<Vec<BatchRequest>> {
    serde_json::from_str(input).context("batch input must be a JSON array of chart requests")
}

pub async fn resolve(
    lookup: Arc<dyn VersionLookup>,
    input: &str,
    options: &BatchOptions,
) -> Result<Vec<BatchResult>> {
    let requests = parse_requests(input)?;
    Ok(resolve_batch(lookup, requests, options).await)
}

pub async fn run(lookup: Arc<dyn VersionLookup>, input: &str, options: &BatchOptions) -> Result<()> {
    let results = resolve(lookup, input, options).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
