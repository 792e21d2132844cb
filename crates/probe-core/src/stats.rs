use crate::executor::ProbeResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistical summary of a completed run. Computed once from the full result
/// set; percentages always use the configured request count as denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub total_requests: u64,
    pub completed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Percent of `total_requests` that received a response
    pub success_rate: f64,
    /// Sorted by instance id
    pub instances: Vec<InstanceShare>,
    /// Absent when no request succeeded
    pub latency: Option<LatencySummary>,
    /// Sorted by status code, 0 counts failed requests
    pub status_codes: Vec<StatusCount>,
    pub error_samples: Vec<ErrorSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceShare {
    pub instance_id: String,
    pub count: u64,
    pub percentage: f64,
}

/// Latency over successful requests, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation, needs at least two samples
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status_code: u16,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub request_id: u64,
    pub message: String,
}

impl AggregateReport {
    /// Reduce `results` into a report. `error_samples` caps how many failures
    /// are kept, taken in the order the results were collected.
    pub fn from_results(results: &[ProbeResult], total_requests: u64, error_samples: usize) -> Self {
        let mut by_instance: BTreeMap<&str, u64> = BTreeMap::new();
        let mut by_status: BTreeMap<u16, u64> = BTreeMap::new();
        let mut latencies = Vec::new();
        let mut samples = Vec::new();

        for result in results {
            *by_instance.entry(result.instance_id.as_str()).or_insert(0) += 1;
            *by_status.entry(result.status_code).or_insert(0) += 1;

            if result.success {
                latencies.push(result.response_time);
            } else if samples.len() < error_samples {
                samples.push(ErrorSample {
                    request_id: result.request_id,
                    message: result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                });
            }
        }

        let successful = latencies.len() as u64;
        let completed = results.len() as u64;

        let instances = by_instance
            .into_iter()
            .map(|(instance_id, count)| InstanceShare {
                instance_id: instance_id.to_string(),
                count,
                percentage: percent(count, total_requests),
            })
            .collect();

        let status_codes = by_status
            .into_iter()
            .map(|(status_code, count)| StatusCount { status_code, count })
            .collect();

        Self {
            total_requests,
            completed,
            successful,
            failed: completed - successful,
            success_rate: percent(successful, total_requests),
            instances,
            latency: LatencySummary::from_samples(latencies),
            status_codes,
            error_samples: samples,
        }
    }

    pub fn instance(&self, instance_id: &str) -> Option<&InstanceShare> {
        self.instances.iter().find(|s| s.instance_id == instance_id)
    }
}

impl LatencySummary {
    pub fn from_samples(mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let n = samples.len();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            samples[n / 2]
        } else {
            (samples[n / 2 - 1] + samples[n / 2]) / 2.0
        };
        let std_dev = if n > 1 {
            let sum_sq: f64 = samples.iter().map(|x| (x - mean) * (x - mean)).sum();
            Some((sum_sq / (n - 1) as f64).sqrt())
        } else {
            None
        };

        Some(Self {
            samples: n as u64,
            mean,
            median,
            min: samples[0],
            max: samples[n - 1],
            std_dev,
        })
    }
}

// count * 100 / total keeps whole-number shares exact (3000 of 10000 is 30.0).
fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 100.0) / total as f64
}
