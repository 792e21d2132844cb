use crate::stats::AggregateReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything a finished run produced, as rendered and as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub transport: String,
    pub total_requests: u64,
    pub max_workers: u32,
    pub duration_secs: f64,
    pub achieved_qps: f64,
    pub report: AggregateReport,
}

impl RunRecord {
    pub fn new(
        url: String,
        transport: String,
        max_workers: u32,
        elapsed: Duration,
        report: AggregateReport,
    ) -> Self {
        let duration_secs = elapsed.as_secs_f64();
        let achieved_qps = if duration_secs > 0.0 {
            report.total_requests as f64 / duration_secs
        } else {
            0.0
        };

        Self {
            timestamp: Utc::now(),
            url,
            transport,
            total_requests: report.total_requests,
            max_workers,
            duration_secs,
            achieved_qps,
            report,
        }
    }
}

const RULE: &str = "============================================================";

pub fn render_banner(url: &str, total_requests: u64, max_workers: u32) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Load balancing probe");
    let _ = writeln!(out, "URL: {url}");
    let _ = writeln!(out, "Total requests: {total_requests}");
    let _ = writeln!(out, "Concurrency: {max_workers}");
    let _ = writeln!(out, "{RULE}");
    out
}

pub fn render_text(record: &RunRecord) -> String {
    let report = &record.report;
    let mut out = String::new();

    let _ = writeln!(out, "\n{RULE}");
    let _ = writeln!(out, "Results ({} transport)", record.transport);
    let _ = writeln!(out, "{RULE}");

    let _ = writeln!(out, "\nRequest distribution:");
    for share in &report.instances {
        let _ = writeln!(
            out,
            "  Instance {}: {} requests ({:.1}%)",
            share.instance_id, share.count, share.percentage
        );
    }

    let _ = writeln!(
        out,
        "\nSuccess rate: {:.1}% ({}/{})",
        report.success_rate, report.successful, report.total_requests
    );

    match &report.latency {
        Some(latency) => {
            let _ = writeln!(out, "\nResponse times:");
            let _ = writeln!(out, "  Mean: {:.3}s", latency.mean);
            let _ = writeln!(out, "  Median: {:.3}s", latency.median);
            let _ = writeln!(out, "  Min: {:.3}s", latency.min);
            let _ = writeln!(out, "  Max: {:.3}s", latency.max);
            if let Some(std_dev) = latency.std_dev {
                let _ = writeln!(out, "  Std dev: {:.3}s", std_dev);
            }
        }
        None => {
            let _ = writeln!(out, "\nResponse times: unavailable (no successful requests)");
        }
    }

    let _ = writeln!(out, "\nStatus codes:");
    for status in &report.status_codes {
        let _ = writeln!(out, "  {}: {}", status.status_code, status.count);
    }

    if report.failed > 0 {
        let _ = writeln!(out, "\nErrors ({}):", report.failed);
        for sample in &report.error_samples {
            let _ = writeln!(out, "  - [{}] {}", sample.request_id, sample.message);
        }
    }

    let _ = writeln!(out, "\nTotal time: {:.2}s", record.duration_secs);
    let _ = writeln!(out, "Average QPS: {:.2}", record.achieved_qps);
    let _ = writeln!(out, "{RULE}");
    out
}

/// Write the record as pretty JSON under `dir`, returning the file path.
pub fn write_json(record: &RunRecord, dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results dir {}", dir.display()))?;

    let timestamp = record.timestamp.format("%Y%m%d_%H%M%S");
    let output_path = dir.join(format!("probe_{timestamp}.json"));
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&output_path, json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProbeResult;

    fn record(results: &[ProbeResult], total: u64, elapsed: Duration) -> RunRecord {
        let report = AggregateReport::from_results(results, total, 5);
        RunRecord::new(
            "http://lb.test/posts".to_string(),
            "mock".to_string(),
            4,
            elapsed,
            report,
        )
    }

    #[test]
    fn test_banner() {
        let banner = render_banner("http://lb.test/", 10_000, 100);
        assert!(banner.contains("URL: http://lb.test/"));
        assert!(banner.contains("Total requests: 10000"));
        assert!(banner.contains("Concurrency: 100"));
    }

    #[test]
    fn test_render_mixed_run() {
        let results = vec![
            ProbeResult::received(0, "A".into(), 200, 0.1),
            ProbeResult::received(1, "B".into(), 200, 0.3),
            ProbeResult::failed(2, "connection refused".into(), 0.01),
            ProbeResult::received(3, "A".into(), 502, 0.2),
        ];
        let record = record(&results, 4, Duration::from_secs(2));
        let text = render_text(&record);

        assert_eq!(record.achieved_qps, 2.0);
        assert!(text.contains("Instance A: 2 requests (50.0%)"));
        assert!(text.contains("Instance error: 1 requests (25.0%)"));
        assert!(text.contains("Success rate: 75.0% (3/4)"));
        assert!(text.contains("Median: 0.200s"));
        assert!(text.contains("Std dev: 0.100s"));
        assert!(text.contains("  502: 1"));
        assert!(text.contains("Errors (1):"));
        assert!(text.contains("  - [2] connection refused"));
        assert!(text.contains("Total time: 2.00s"));
        assert!(text.contains("Average QPS: 2.00"));
    }

    #[test]
    fn test_render_without_successes() {
        let results = vec![ProbeResult::failed(0, "timed out".into(), 10.0)];
        let text = render_text(&record(&results, 1, Duration::ZERO));

        assert!(text.contains("Success rate: 0.0% (0/1)"));
        assert!(text.contains("Response times: unavailable"));
        assert!(text.contains("Average QPS: 0.00"));
    }

    #[test]
    fn test_write_json() {
        let dir = std::env::temp_dir().join(format!("probe-report-{}", std::process::id()));
        let results = vec![ProbeResult::received(0, "A".into(), 200, 0.1)];
        let record = record(&results, 1, Duration::from_millis(100));

        let path = write_json(&record, &dir).unwrap();
        let written: RunRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.report, record.report);
        assert_eq!(written.timestamp, record.timestamp);
        let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(
            file_name,
            format!("probe_{}.json", record.timestamp.format("%Y%m%d_%H%M%S"))
        );
        assert_eq!(written.url, "http://lb.test/posts");

        std::fs::remove_dir_all(&dir).ok();
    }
}
