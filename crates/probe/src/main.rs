use anyhow::{Context, Result};
use clap::Parser;
use probe_core::{
    render_banner, render_text, write_json, AggregateReport, ConfigOverrides, DispatchSettings,
    Dispatcher, HttpTransport, MockTransport, ProbeConfig, RequestExecutor, RunRecord, Transport,
    DEFAULT_TARGET_URL,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "probe")]
#[command(about = "Fire N concurrent GETs at one endpoint and report how the load balancer spread them")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transport mode: http or mock
    #[arg(long, default_value = "http")]
    mode: String,

    /// Target URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Total requests to send (overrides config)
    #[arg(long)]
    requests: Option<u64>,

    /// Maximum requests in flight (overrides config)
    #[arg(long)]
    workers: Option<u32>,

    /// Per-request timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Write a JSON run record into this directory (overrides config)
    #[arg(long)]
    results_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    config.validate()?;

    let transport: Arc<dyn Transport> = match args.mode.as_str() {
        "http" => Arc::new(
            HttpTransport::new(config.timeout(), config.run.max_workers as usize)
                .context("Failed to create HTTP transport")?,
        ),
        "mock" => Arc::new(MockTransport::new(
            5,
            &config.identity.header,
            vec!["mock-a".to_string(), "mock-b".to_string(), "mock-c".to_string()],
        )?),
        _ => anyhow::bail!("Invalid mode: {}, must be 'http' or 'mock'", args.mode),
    };

    info!("Using transport: {}", transport.name());
    print!(
        "{}",
        render_banner(&config.target.url, config.run.total_requests, config.run.max_workers)
    );

    let executor = Arc::new(RequestExecutor::from_config(transport, &config));
    let dispatcher = Dispatcher::new(DispatchSettings::from_config(&config), executor.clone());

    info!("Starting probe...");
    let outcome = dispatcher.run().await?;

    let report = AggregateReport::from_results(
        &outcome.results,
        config.run.total_requests,
        config.output.error_samples,
    );
    let record = RunRecord::new(
        executor.url().to_string(),
        executor.transport_name().to_string(),
        config.run.max_workers,
        outcome.elapsed,
        report,
    );

    print!("{}", render_text(&record));

    if let Some(dir) = &config.output.results_dir {
        let path = write_json(&record, dir)?;
        info!("Results written to {}", path.display());
    }

    Ok(())
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            total_requests: self.requests,
            max_workers: self.workers,
            timeout_ms: self.timeout_ms,
            results_dir: self.results_dir.clone(),
        }
    }
}

fn load_config(args: &Args) -> Result<ProbeConfig> {
    let mut config = match &args.config {
        Some(path) => ProbeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ProbeConfig::for_url(DEFAULT_TARGET_URL),
    };
    config.apply_overrides(&args.overrides());

    Ok(config)
}
