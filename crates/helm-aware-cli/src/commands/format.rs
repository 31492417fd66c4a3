use helm_aware::BatchStatus;

use crate::commands::scan::{ChartReport, ResourceReport};

const MAX_CHART_WIDTH: usize = 40;
const MAX_VERSION_WIDTH: usize = 20;

pub fn print_scan_table(reports: &[ResourceReport]) {
    let mut total = 0usize;
    let mut outdated = 0usize;
    let mut first = true;

    for report in reports {
        if !first {
            println!();
        }
        first = false;

        println!("{} ({})", report.resource, report.origin);

        let chart_width = report
            .charts
            .iter()
            .map(|c| c.chart.chart_name.chars().count())
            .max()
            .unwrap_or(0)
            .min(MAX_CHART_WIDTH);
        let version_width = report
            .charts
            .iter()
            .map(|c| c.chart.chart_version.chars().count())
            .max()
            .unwrap_or(0)
            .min(MAX_VERSION_WIDTH);

        for chart in &report.charts {
            println!(
                "  {:<cw$}  {:<vw$}  {}",
                truncate(&chart.chart.chart_name, chart_width),
                truncate(&chart.chart.chart_version, version_width),
                status_column(chart),
                cw = chart_width,
                vw = version_width,
            );
            total += 1;
            if chart.outdated {
                outdated += 1;
            }
        }
    }

    println!("\n{total} charts, {outdated} outdated");
}

fn status_column(chart: &ChartReport) -> String {
    match (chart.status, chart.latest.as_deref()) {
        (BatchStatus::Success, Some(latest)) if chart.outdated => format!("-> {latest}"),
        (BatchStatus::Success, Some(_)) => "up to date".into(),
        (BatchStatus::Success, None) => "no versions found".into(),
        (status, _) => {
            let label = match status {
                BatchStatus::Timeout => "timeout",
                _ => "error",
            };
            match &chart.error {
                Some(error) => format!("{label}: {error}"),
                None => label.into(),
            }
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}
