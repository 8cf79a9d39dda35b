//! Network probe primitives.
//!
//! Bounded TCP connects and HTTP requests. Both return a result struct in
//! every case — a refused connection or a timeout is recorded in the
//! struct, not raised.

use std::time::{Duration, Instant};

use tracing::debug;

/// Result of a single TCP reachability probe.
#[derive(Debug, Clone)]
pub struct TcpProbeResult {
    pub host: String,
    pub port: u16,
    pub ok: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl TcpProbeResult {
    pub fn detail(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host,
            "port": self.port,
            "latency_ms": self.latency_ms,
        })
    }
}

/// Attempt a TCP connection within the timeout.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> TcpProbeResult {
    let started = Instant::now();
    let addr = format!("{host}:{port}");

    let result = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let error = match result {
        Ok(Ok(_stream)) => None,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "tcp probe failed");
            Some(e.to_string())
        }
        Err(_) => {
            debug!(%addr, ?timeout, "tcp probe timed out");
            Some(format!("connect timed out after {}ms", timeout.as_millis()))
        }
    };

    TcpProbeResult {
        host: host.to_string(),
        port,
        ok: error.is_none(),
        latency_ms,
        error,
    }
}

/// What counts as a passing HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpExpectation {
    /// 2xx only — the default for plain `http_check` probes.
    Success,
    /// Anything below 500. Gateways that answer unauthenticated GETs with
    /// 4xx are still reachable, which is all a reachability probe asks.
    AllowClientErrors,
    /// An explicit status list from configuration.
    OneOf(Vec<u16>),
}

impl HttpExpectation {
    fn matches(&self, status: u16) -> bool {
        match self {
            HttpExpectation::Success => (200..300).contains(&status),
            HttpExpectation::AllowClientErrors => status < 500,
            HttpExpectation::OneOf(list) => list.contains(&status),
        }
    }
}

/// Result of a single HTTP probe.
#[derive(Debug, Clone)]
pub struct HttpProbeResult {
    pub url: String,
    pub method: String,
    /// Zero when no response was received at all.
    pub status_code: u16,
    pub ok: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl HttpProbeResult {
    pub fn detail(&self) -> serde_json::Value {
        serde_json::json!({
            "url": self.url,
            "method": self.method,
            "status_code": self.status_code,
            "latency_ms": self.latency_ms,
        })
    }
}

/// Issue a bounded HTTP request and classify the response status.
pub async fn http_probe(
    url: &str,
    method: &str,
    timeout: Duration,
    expect: &HttpExpectation,
) -> HttpProbeResult {
    let started = Instant::now();
    let method = method.to_uppercase();

    let outcome = async {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(false)
            .build()
            .map_err(|e| e.to_string())?;
        let req_method: reqwest::Method =
            method.parse().map_err(|_| format!("invalid method '{method}'"))?;
        let resp = client
            .request(req_method, url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok::<u16, String>(resp.status().as_u16())
    }
    .await;

    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(status) => {
            let ok = expect.matches(status);
            if !ok {
                debug!(%url, status, "http probe status outside expectation");
            }
            HttpProbeResult {
                url: url.to_string(),
                method,
                status_code: status,
                ok,
                latency_ms,
                error: None,
            }
        }
        Err(e) => {
            debug!(%url, error = %e, "http probe failed");
            HttpProbeResult {
                url: url.to_string(),
                method,
                status_code: 0,
                ok: false,
                latency_ms,
                error: Some(e),
            }
        }
    }
}

/// Extract host and port from a URL, defaulting the port from the scheme.
pub fn url_host_port(url: &str) -> Option<(String, u16)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port_or_known_default()?;
    Some((host, port))
}
