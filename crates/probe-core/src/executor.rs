use crate::config::{IdentityConfig, ProbeConfig};
use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

/// Instance id recorded when a response carried no identity.
pub const UNKNOWN_INSTANCE: &str = "unknown";
/// Instance id recorded when no response was received at all.
pub const ERROR_INSTANCE: &str = "error";

/// Outcome of one request attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub request_id: u64,
    pub instance_id: String,
    /// HTTP status, 0 when no response arrived
    pub status_code: u16,
    /// Seconds from dispatch to outcome, recorded for failures too
    pub response_time: f64,
    /// A response was received, whatever its status
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProbeResult {
    pub fn received(request_id: u64, instance_id: String, status_code: u16, response_time: f64) -> Self {
        Self {
            request_id,
            instance_id,
            status_code,
            response_time,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(request_id: u64, error_message: String, response_time: f64) -> Self {
        Self {
            request_id,
            instance_id: ERROR_INSTANCE.to_string(),
            status_code: 0,
            response_time,
            success: false,
            error_message: Some(error_message),
        }
    }
}

/// What the executor needs from a received HTTP response.
#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Trait for the HTTP layer underneath the executor. An `Err` means no
/// response was received (timeout, refused connection, DNS or TLS failure).
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ProbeResponse>> + Send + 'a>>;
}

/// Mock transport for dry runs: fixed latency, instances served in rotation.
pub struct MockTransport {
    delay_ms: u64,
    header: HeaderName,
    instances: Vec<String>,
    next_instance: AtomicUsize,
}

impl MockTransport {
    pub fn new(delay_ms: u64, header: &str, instances: Vec<String>) -> Result<Self> {
        if instances.is_empty() {
            anyhow::bail!("mock transport needs at least one instance id");
        }
        Ok(Self {
            delay_ms,
            header: HeaderName::from_bytes(header.as_bytes())?,
            instances,
            next_instance: AtomicUsize::new(0),
        })
    }

    fn next_instance(&self) -> &str {
        let idx = self.next_instance.fetch_add(1, Ordering::Relaxed);
        &self.instances[idx % self.instances.len()]
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn get<'a>(
        &'a self,
        _url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ProbeResponse>> + Send + 'a>> {
        Box::pin(async move {
            sleep(Duration::from_millis(self.delay_ms)).await;

            let mut headers = HeaderMap::new();
            headers.insert(
                self.header.clone(),
                HeaderValue::from_str(self.next_instance())?,
            );

            Ok(ProbeResponse {
                status: 200,
                headers,
                body: Vec::new(),
            })
        })
    }
}

/// reqwest-backed transport. The client timeout bounds each request end to end.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, max_idle_per_host: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ProbeResponse>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();

            // The status line and headers are in, so this already counts as a
            // delivered response; a broken body only costs the identity fallback.
            let body = match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    debug!("Failed to read response body: {}", e);
                    Vec::new()
                }
            };

            Ok(ProbeResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// Resolve the serving instance: the identity header if present and
/// non-empty, otherwise the identity field of a JSON body.
pub fn resolve_instance_id(
    headers: &HeaderMap,
    body: &[u8],
    identity: &IdentityConfig,
) -> Option<String> {
    instance_from_header(headers, &identity.header)
        .or_else(|| instance_from_body(body, &identity.body_field))
}

fn instance_from_header(headers: &HeaderMap, name: &str) -> Option<String> {
    // Opaque bytes still name the backend that served the request.
    let value = String::from_utf8_lossy(headers.get(name)?.as_bytes());
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn instance_from_body(body: &[u8], field: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
    match parsed.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Performs one GET per call and turns whatever happens into a `ProbeResult`.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    url: String,
    identity: IdentityConfig,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, url: String, identity: IdentityConfig) -> Self {
        Self {
            transport,
            url,
            identity,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &ProbeConfig) -> Self {
        Self::new(
            transport,
            config.target.url.clone(),
            config.identity.clone(),
        )
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Attempt the request exactly once. Never fails: transport errors come
    /// back as an unsuccessful result.
    pub async fn execute(&self, request_id: u64) -> ProbeResult {
        let start = Instant::now();

        match self.transport.get(&self.url).await {
            Ok(response) => {
                let instance_id =
                    resolve_instance_id(&response.headers, &response.body, &self.identity)
                        .unwrap_or_else(|| UNKNOWN_INSTANCE.to_string());
                let response_time = start.elapsed().as_secs_f64();
                ProbeResult::received(request_id, instance_id, response.status, response_time)
            }
            Err(e) => {
                let response_time = start.elapsed().as_secs_f64();
                debug!(request_id, "Request failed: {:#}", e);
                ProbeResult::failed(request_id, format!("{e:#}"), response_time)
            }
        }
    }
}
