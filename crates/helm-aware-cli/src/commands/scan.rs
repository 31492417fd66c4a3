use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use helm_aware::{
    BatchOptions, BatchRequest, BatchStatus, ChartIdentity, ResourceRef, VersionLookup, analyze,
    latest, resolve_batch,
};
use serde::Serialize;

use crate::commands::format;
use crate::manifests::LoadedDocument;

/// One resource and the state of each chart it deploys.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub origin: String,
    pub resource: ResourceRef,
    pub charts: Vec<ChartReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartReport {
    pub chart: ChartIdentity,
    pub latest: Option<String>,
    /// Deployed version differs from the newest available one.
    pub outdated: bool,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Analyze every document and resolve each distinct chart once.
pub async fn scan(
    lookup: Arc<dyn VersionLookup>,
    documents: &[LoadedDocument],
    options: &BatchOptions,
) -> Vec<ResourceReport> {
    let analyzed: Vec<_> = documents
        .iter()
        .map(|loaded| (loaded.origin.as_str(), analyze(&loaded.document)))
        .filter(|(_, analyzed)| !analyzed.charts.is_empty())
        .collect();

    // Versions depend only on repository and chart, not on what is deployed.
    let mut ids: HashMap<(&str, &str), String> = HashMap::new();
    let mut requests = Vec::new();
    for (_, resource) in &analyzed {
        for chart in &resource.charts {
            let key = (chart.repo_url.as_str(), chart.chart_name.as_str());
            if !ids.contains_key(&key) {
                let id = ids.len().to_string();
                requests.push(BatchRequest::new(id.clone(), chart));
                ids.insert(key, id);
            }
        }
    }

    let results: HashMap<String, _> = resolve_batch(lookup, requests, options)
        .await
        .into_iter()
        .map(|result| (result.chart_id.clone(), result))
        .collect();

    analyzed
        .iter()
        .map(|(origin, resource)| ResourceReport {
            origin: (*origin).to_owned(),
            resource: resource.resource.clone(),
            charts: resource
                .charts
                .iter()
                .map(|chart| {
                    let key = (chart.repo_url.as_str(), chart.chart_name.as_str());
                    let result = ids.get(&key).and_then(|id| results.get(id));
                    match result {
                        Some(result) => {
                            let newest = latest(&result.versions).map(str::to_owned);
                            ChartReport {
                                chart: chart.clone(),
                                outdated: newest
                                    .as_deref()
                                    .is_some_and(|v| v != chart.chart_version),
                                latest: newest,
                                status: result.status,
                                error: result.error.clone(),
                            }
                        }
                        None => ChartReport {
                            chart: chart.clone(),
                            latest: None,
                            outdated: false,
                            status: BatchStatus::Error,
                            error: Some("no result".into()),
                        },
                    }
                })
                .collect(),
        })
        .collect()
}

pub async fn run(
    lookup: Arc<dyn VersionLookup>,
    documents: &[LoadedDocument],
    options: &BatchOptions,
    json: bool,
) -> Result<()> {
    let reports = scan(lookup, documents, options).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No Helm charts found.");
        return Ok(());
    }

    format::print_scan_table(&reports);
    Ok(())
}
