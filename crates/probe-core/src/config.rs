use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TARGET_URL: &str = "http://localhost/api/v1/communityPost/posts/guest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ProbeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ProbeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Default configuration pointed at `url`.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            target: TargetConfig {
                url: url.into(),
                timeout_ms: default_timeout_ms(),
            },
            run: RunConfig::default(),
            identity: IdentityConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Apply command-line values on top of whatever the file provided.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.url {
            self.target.url = url.clone();
        }
        if let Some(total_requests) = overrides.total_requests {
            self.run.total_requests = total_requests;
        }
        if let Some(max_workers) = overrides.max_workers {
            self.run.max_workers = max_workers;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.target.timeout_ms = timeout_ms;
        }
        if let Some(dir) = &overrides.results_dir {
            self.output.results_dir = Some(dir.clone());
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_target_url(&self.target.url)
            .with_context(|| format!("Invalid target.url: {}", self.target.url))?;

        if self.target.timeout_ms == 0 {
            anyhow::bail!("target.timeout_ms must be non-zero");
        }
        if self.run.total_requests == 0 {
            anyhow::bail!("run.total_requests must be at least 1");
        }
        if self.run.max_workers == 0 {
            anyhow::bail!("run.max_workers must be at least 1");
        }
        if self.identity.header.trim().is_empty() {
            anyhow::bail!("identity.header must not be empty");
        }
        if self.identity.body_field.trim().is_empty() {
            anyhow::bail!("identity.body_field must not be empty");
        }

        if self.run.max_workers as u64 > self.run.total_requests {
            warn!(
                "max_workers ({}) exceeds total_requests ({}); extra workers will stay idle",
                self.run.max_workers, self.run.total_requests
            );
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.target.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Endpoint every request is sent to
    #[serde(default = "default_target_url")]
    pub url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: default_target_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of requests to fire (N)
    #[serde(default = "default_total_requests")]
    pub total_requests: u64,
    /// Maximum requests in flight at once (C)
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Log progress every N completions, 0 disables
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_requests: default_total_requests(),
            max_workers: default_max_workers(),
            progress_every: default_progress_every(),
        }
    }
}

/// Where the serving instance is read from in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_header")]
    pub header: String,
    #[serde(default = "default_identity_body_field")]
    pub body_field: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: default_identity_header(),
            body_field: default_identity_body_field(),
        }
    }
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub total_requests: Option<u64>,
    pub max_workers: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub results_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// How many failed requests the report lists
    #[serde(default = "default_error_samples")]
    pub error_samples: usize,
    /// Directory for the JSON run record, none to skip writing
    #[serde(default)]
    pub results_dir: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            error_samples: default_error_samples(),
            results_dir: None,
        }
    }
}

fn default_target_url() -> String {
    DEFAULT_TARGET_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_total_requests() -> u64 {
    10_000
}

fn default_max_workers() -> u32 {
    100
}

fn default_progress_every() -> u64 {
    10
}

fn default_identity_header() -> String {
    "X-Instance-ID".to_string()
}

fn default_identity_body_field() -> String {
    "instance".to_string()
}

fn default_error_samples() -> usize {
    5
}

fn validate_target_url(raw: &str) -> anyhow::Result<url::Url> {
    let url = url::Url::parse(raw).with_context(|| format!("Invalid URL: {raw}"))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("URL must be http:// or https:// (got {raw})");
    }
    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("URL must not include credentials (got {raw})");
    }
    if url.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("URL must include a hostname (got {raw})");
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[target]
url = "http://localhost:8080/api/v1/communityPost/posts/guest"
timeout_ms = 5000

[run]
total_requests = 2000
max_workers = 50

[identity]
header = "X-Backend"

[output]
results_dir = "results"
        "#;

        let config: ProbeConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.target.timeout_ms, 5000);
        assert_eq!(config.run.total_requests, 2000);
        assert_eq!(config.run.max_workers, 50);
        assert_eq!(config.run.progress_every, 10);
        assert_eq!(config.identity.header, "X-Backend");
        assert_eq!(config.identity.body_field, "instance");
        assert_eq!(config.output.error_samples, 5);
        assert_eq!(config.output.results_dir.as_deref(), Some("results"));
        config.validate().unwrap();
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProbeConfig = toml::from_str("[target]\nurl = \"http://lb.local/\"\n").unwrap();
        assert_eq!(config.target.timeout_ms, 10_000);
        assert_eq!(config.run.total_requests, 10_000);
        assert_eq!(config.run.max_workers, 100);
        assert_eq!(config.identity.header, "X-Instance-ID");
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ProbeConfig::for_url("ftp://lb.local/");
        assert!(config.validate().is_err());

        config.target.url = "http://user:pw@lb.local/".to_string();
        assert!(config.validate().is_err());

        config.target.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.target.url = DEFAULT_TARGET_URL.to_string();
        config.validate().unwrap();

        config.run.total_requests = 0;
        assert!(config.validate().is_err());
        config.run.total_requests = 10;

        config.run.max_workers = 0;
        assert!(config.validate().is_err());
        config.run.max_workers = 10;

        config.target.timeout_ms = 0;
        assert!(config.validate().is_err());
        config.target.timeout_ms = 1;

        config.identity.header = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_only_file_then_overrides() {
        let path = std::env::temp_dir().join(format!("probe-run-only-{}.toml", std::process::id()));
        std::fs::write(&path, "[run]\ntotal_requests = 50\nmax_workers = 5\n").unwrap();

        let mut config = ProbeConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.target.url, DEFAULT_TARGET_URL);
        assert_eq!(config.target.timeout_ms, 10_000);
        assert_eq!(config.run.total_requests, 50);

        config.apply_overrides(&ConfigOverrides {
            url: Some("http://lb.local/posts".to_string()),
            ..Default::default()
        });
        assert_eq!(config.target.url, "http://lb.local/posts");
        assert_eq!(config.run.total_requests, 50);
        assert_eq!(config.run.max_workers, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides_take_precedence_over_file() {
        let mut config: ProbeConfig = toml::from_str(
            r#"
[target]
url = "http://file.local/"
timeout_ms = 3000

[run]
total_requests = 100
max_workers = 10

[output]
results_dir = "from-file"
            "#,
        )
        .unwrap();

        config.apply_overrides(&ConfigOverrides {
            url: Some("https://cli.local/guest".to_string()),
            total_requests: Some(7),
            max_workers: Some(3),
            timeout_ms: Some(250),
            results_dir: Some("from-cli".to_string()),
        });

        assert_eq!(config.target.url, "https://cli.local/guest");
        assert_eq!(config.run.total_requests, 7);
        assert_eq!(config.run.max_workers, 3);
        assert_eq!(config.target.timeout_ms, 250);
        assert_eq!(config.output.results_dir.as_deref(), Some("from-cli"));
    }

    #[test]
    fn test_empty_overrides_keep_file_values() {
        let mut config = ProbeConfig::for_url("http://file.local/");
        config.run.total_requests = 9;
        config.apply_overrides(&ConfigOverrides::default());

        assert_eq!(config.target.url, "http://file.local/");
        assert_eq!(config.run.total_requests, 9);
        assert!(config.output.results_dir.is_none());
    }

    #[test]
    fn test_overridden_url_is_validated() {
        let mut config = ProbeConfig::for_url(DEFAULT_TARGET_URL);
        config.apply_overrides(&ConfigOverrides {
            url: Some("ftp://lb.local/".to_string()),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config: ProbeConfig =
            toml::from_str(include_str!("../../../config/example.local.toml")).unwrap();
        assert_eq!(config.target.url, DEFAULT_TARGET_URL);
        assert!(config.output.results_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_more_workers_than_requests_is_allowed() {
        let mut config = ProbeConfig::for_url("https://lb.local/health");
        config.run.total_requests = 5;
        config.run.max_workers = 50;
        config.validate().unwrap();
    }
}
