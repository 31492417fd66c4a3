use anyhow::{Context, Result};
use helm_aware::{ChartIdentity, VersionLookup, latest};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct VersionsOutput<'a> {
    repo_url: &'a str,
    chart_name: &'a str,
    latest: Option<&'a str>,
    versions: &'a [String],
}

pub async fn run(lookup: &dyn VersionLookup, identity: &ChartIdentity, json: bool) -> Result<()> {
    let versions = lookup
        .lookup(identity)
        .await
        .with_context(|| format!("failed to resolve versions of {identity}"))?;

    if json {
        let output = VersionsOutput {
            repo_url: &identity.repo_url,
            chart_name: &identity.chart_name,
            latest: latest(&versions),
            versions: &versions,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if versions.is_empty() {
        eprintln!("No versions found for {identity}");
        return Ok(());
    }

    for version in &versions {
        println!("{version}");
    }
    Ok(())
}
