use crate::config::ProbeConfig;
use crate::executor::{ProbeResult, RequestExecutor};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};

/// Upper bound on the collector's initial allocation; larger runs grow the vector.
const INITIAL_RESULT_CAPACITY: u64 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Requests to fire (N)
    pub total_requests: u64,
    /// Concurrency ceiling (C)
    pub max_workers: u32,
    /// Log progress every N completions, 0 disables
    pub progress_every: u64,
}

impl DispatchSettings {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            total_requests: config.run.total_requests,
            max_workers: config.run.max_workers,
            progress_every: config.run.progress_every,
        }
    }
}

/// Every result of a run, in completion order.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub results: Vec<ProbeResult>,
    pub elapsed: Duration,
}

/// Runs the executor N times with at most C requests in flight and gathers
/// every outcome through a single collector task.
pub struct Dispatcher {
    settings: DispatchSettings,
    executor: Arc<RequestExecutor>,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings, executor: Arc<RequestExecutor>) -> Self {
        Self { settings, executor }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub async fn run(&self) -> Result<DispatchOutcome> {
        let total = self.settings.total_requests;
        let progress_every = self.settings.progress_every;
        if self.settings.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }

        let start_time = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers as usize));

        let channel_capacity = (self.settings.max_workers as usize).max(1) * 2;
        let (result_tx, mut result_rx) = mpsc::channel::<ProbeResult>(channel_capacity);

        // Only the collector touches the result vector.
        let collector = tokio::spawn(async move {
            let mut results = Vec::with_capacity(total.min(INITIAL_RESULT_CAPACITY) as usize);
            while let Some(result) = result_rx.recv().await {
                results.push(result);
                let done = results.len() as u64;
                if progress_due(done, progress_every) {
                    info!("Completed: {}/{}", done, total);
                }
            }
            results
        });

        for request_id in 0..total {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Concurrency semaphore closed")?;
            let executor = self.executor.clone();
            let result_tx = result_tx.clone();

            tokio::spawn(async move {
                let result = executor.execute(request_id).await;
                drop(permit);
                if result_tx.send(result).await.is_err() {
                    debug!(request_id, "Collector gone, result dropped");
                }
            });
        }

        // The channel closes once the last in-flight task sends its result.
        drop(result_tx);
        let results = collector.await.context("Result collector task failed")?;
        let elapsed = start_time.elapsed();

        if results.len() as u64 != total {
            anyhow::bail!(
                "Collected {} results for {} dispatched requests",
                results.len(),
                total
            );
        }

        Ok(DispatchOutcome { results, elapsed })
    }
}

fn progress_due(done: u64, every: u64) -> bool {
    every > 0 && done % every == 0
}
