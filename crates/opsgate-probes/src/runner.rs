//! The probe runner — dispatches one definition to its kind-specific check.

use std::time::Duration;

use tracing::debug;

use opsgate_core::{ProbeDefinition, ProbeKind, ProbeParams, epoch_ms};
use opsgate_state::{ProbeRun, ProbeStep};

use crate::net::{HttpExpectation, http_probe, tcp_probe, url_host_port};
use crate::signals::{DEFAULT_FAILED_RECENT_QUERY, DEFAULT_OUTBOX_QUERY, psql_scalar};

/// Default SMS provider API base when the probe config leaves it unset.
const DEFAULT_SMS_BASE_URL: &str = "https://api.afromessage.com/api";

/// Default identity gateway base when the probe config leaves it unset.
const DEFAULT_NID_BASE_URL: &str = "http://196.188.240.67/gateway";

/// Executes probes. The seam the scheduler is generic over, so tests can
/// substitute a slow or counting executor.
pub trait ProbeExecutor: Send + Sync + 'static {
    fn run_probe(
        &self,
        definition: &ProbeDefinition,
    ) -> impl std::future::Future<Output = ProbeRun> + Send;
}

/// The production probe runner. Stateless; only makes outbound calls.
#[derive(Debug, Clone, Default)]
pub struct ProbeRunner;

impl ProbeRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run one probe to completion. Always returns a `ProbeRun`; expected
    /// network failures become failed steps and definition problems become
    /// `status = "error"` runs.
    pub async fn run(&self, definition: &ProbeDefinition) -> ProbeRun {
        let started_at_ms = epoch_ms();
        let timeout = Duration::from_secs(definition.timeout_seconds);

        let outcome = match definition.kind {
            ProbeKind::TcpCheck => check_tcp(&definition.params, timeout).await,
            ProbeKind::HttpCheck => check_http(&definition.params, timeout).await,
            ProbeKind::SmsHealth => check_sms_health(&definition.params, timeout).await,
            ProbeKind::NidHealth => check_nid_health(&definition.params, timeout).await,
        };

        let finished_at_ms = epoch_ms();
        debug!(
            probe_key = %definition.key,
            kind = definition.kind.as_str(),
            ok = outcome.ok,
            status = %outcome.status,
            "probe run finished"
        );

        ProbeRun {
            probe_key: definition.key.clone(),
            started_at_ms,
            finished_at_ms,
            ok: outcome.ok,
            status: outcome.status,
            latency_ms: finished_at_ms.saturating_sub(started_at_ms) as f64,
            error: outcome.error,
            steps: outcome.steps,
        }
    }
}

impl ProbeExecutor for ProbeRunner {
    fn run_probe(
        &self,
        definition: &ProbeDefinition,
    ) -> impl std::future::Future<Output = ProbeRun> + Send {
        self.run(definition)
    }
}

/// Kind-specific result before timestamps are attached.
struct Outcome {
    ok: bool,
    status: String,
    error: Option<String>,
    steps: Vec<ProbeStep>,
}

impl Outcome {
    /// A run that could not execute because the definition is unusable.
    fn definition_error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: "error".to_string(),
            error: Some(message.into()),
            steps: Vec::new(),
        }
    }

    /// Fold a step list: ok iff every non-skipped step passed.
    fn from_steps(steps: Vec<ProbeStep>) -> Self {
        let failed: Vec<&str> = steps
            .iter()
            .filter(|s| !s.passes())
            .map(|s| s.name.as_str())
            .collect();
        let ok = failed.is_empty();
        Self {
            ok,
            status: if ok { "healthy" } else { "degraded" }.to_string(),
            error: if ok { None } else { Some(failed.join("; ")) },
            steps,
        }
    }
}

// ── Simple probes ──────────────────────────────────────────────────

async fn check_tcp(params: &ProbeParams, timeout: Duration) -> Outcome {
    let Some(port) = params.port else {
        return Outcome::definition_error("tcp_check requires a port");
    };
    let host = params.host.as_deref().unwrap_or("127.0.0.1");

    let result = tcp_probe(host, port, timeout.min(Duration::from_secs(10))).await;
    Outcome::from_steps(vec![ProbeStep {
        name: "tcp_connect".to_string(),
        ok: result.ok,
        skipped: false,
        detail: result.detail(),
        error: result.error.clone(),
    }])
}

async fn check_http(params: &ProbeParams, timeout: Duration) -> Outcome {
    let Some(url) = params.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
        return Outcome::definition_error("http_check requires a url");
    };
    let method = params.method.as_deref().unwrap_or("GET");
    let expect = expectation_from(params);

    let result = http_probe(url, method, timeout.min(Duration::from_secs(20)), &expect).await;
    Outcome::from_steps(vec![ProbeStep {
        name: "http_request".to_string(),
        ok: result.ok,
        skipped: false,
        detail: result.detail(),
        error: result.error.clone(),
    }])
}

/// Explicit status list wins, then the 4xx allowance, else strict 2xx.
fn expectation_from(params: &ProbeParams) -> HttpExpectation {
    if let Some(list) = &params.expected_status {
        if !list.is_empty() {
            return HttpExpectation::OneOf(list.clone());
        }
    }
    if params.allow_4xx == Some(true) {
        return HttpExpectation::AllowClientErrors;
    }
    HttpExpectation::Success
}

// ── Composite probes ───────────────────────────────────────────────

async fn check_sms_health(params: &ProbeParams, timeout: Duration) -> Outcome {
    let base_url = params
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_SMS_BASE_URL)
        .to_string();

    let Some((host, port)) = url_host_port(&base_url) else {
        return Outcome::definition_error(format!("sms_health base_url is invalid: {base_url}"));
    };

    let mut steps = Vec::new();

    let tcp = tcp_probe(&host, port, timeout.min(Duration::from_secs(5))).await;
    steps.push(ProbeStep {
        name: "provider_tcp".to_string(),
        ok: tcp.ok,
        skipped: false,
        detail: tcp.detail(),
        error: tcp.error.clone(),
    });

    // Reachability only: the provider answers unauthenticated GETs with 4xx.
    let http = http_probe(
        &base_url,
        "GET",
        timeout.min(Duration::from_secs(8)),
        &HttpExpectation::AllowClientErrors,
    )
    .await;
    steps.push(ProbeStep {
        name: "provider_http".to_string(),
        ok: http.ok,
        skipped: false,
        detail: http.detail(),
        error: http.error.clone(),
    });

    match params.resolve_dsn() {
        Some(dsn) => {
            steps.push(db_scalar_step(
                "db_outbox_backlog",
                &dsn,
                params.outbox_count_query.as_deref().unwrap_or(DEFAULT_OUTBOX_QUERY),
                params.max_outbox.unwrap_or(200),
                timeout,
            )
            .await);
            steps.push(db_scalar_step(
                "db_failed_recent",
                &dsn,
                params
                    .failed_recent_query
                    .as_deref()
                    .unwrap_or(DEFAULT_FAILED_RECENT_QUERY),
                params.max_failed_recent.unwrap_or(20),
                timeout,
            )
            .await);
        }
        None => {
            // Missing optional configuration is a skip, not a failure.
            steps.push(ProbeStep {
                name: "db_checks".to_string(),
                ok: false,
                skipped: true,
                detail: serde_json::Value::Null,
                error: Some("pg_dsn not configured".to_string()),
            });
        }
    }

    Outcome::from_steps(steps)
}

/// Evaluate one scalar signal query against its threshold.
async fn db_scalar_step(
    name: &str,
    dsn: &str,
    query: &str,
    threshold: i64,
    timeout: Duration,
) -> ProbeStep {
    let budget = timeout.max(Duration::from_secs(5));
    match psql_scalar(dsn, query, budget).await {
        Ok(value) => ProbeStep {
            name: name.to_string(),
            ok: value <= threshold,
            skipped: false,
            detail: serde_json::json!({ "value": value, "threshold": threshold }),
            error: if value <= threshold {
                None
            } else {
                Some(format!("{name} {value} exceeds threshold {threshold}"))
            },
        },
        Err(e) => ProbeStep {
            name: name.to_string(),
            ok: false,
            skipped: false,
            detail: serde_json::json!({ "threshold": threshold }),
            error: Some(e),
        },
    }
}

async fn check_nid_health(params: &ProbeParams, timeout: Duration) -> Outcome {
    let base_url = params
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_NID_BASE_URL)
        .to_string();

    let Some((host, port)) = url_host_port(&base_url) else {
        return Outcome::definition_error(format!("nid_health base_url is invalid: {base_url}"));
    };

    let request_data_url = params
        .request_data_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("{base_url}/nid/requestData"));
    let get_data_url = params
        .get_data_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("{base_url}/nid/getData"));

    let mut steps = Vec::new();

    let tcp = tcp_probe(&host, port, timeout.min(Duration::from_secs(5))).await;
    steps.push(ProbeStep {
        name: "gateway_tcp".to_string(),
        ok: tcp.ok,
        skipped: false,
        detail: tcp.detail(),
        error: tcp.error.clone(),
    });

    for (name, url) in [
        ("gateway_http_base", base_url.as_str()),
        ("gateway_http_request_data", request_data_url.as_str()),
        ("gateway_http_get_data", get_data_url.as_str()),
    ] {
        let http = http_probe(
            url,
            "GET",
            timeout.min(Duration::from_secs(8)),
            &HttpExpectation::AllowClientErrors,
        )
        .await;
        steps.push(ProbeStep {
            name: name.to_string(),
            ok: http.ok,
            skipped: false,
            detail: http.detail(),
            error: http.error.clone(),
        });
    }

    Outcome::from_steps(steps)
}
