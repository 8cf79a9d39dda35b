//! REST API handlers.
//!
//! Each handler reads through `StateStore`, the probe scheduler, or the
//! action executor and returns the shared response envelope.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use opsgate_actions::{ActionError, ActionRequest, HelperTransport};
use opsgate_core::epoch_ms;
use opsgate_probes::ProbeExecutor;
use opsgate_scheduler::SchedulerError;
use opsgate_state::{Freshness, ProbeRun};

use crate::auth::actor_from;
use crate::report;
use crate::ApiState;

/// Hard cap on history and audit page sizes.
const MAX_PAGE: usize = 500;
const DEFAULT_PAGE: usize = 100;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Health ─────────────────────────────────────────────────────────

/// GET /api/v1/health — liveness only, no auth.
pub async fn health() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({ "status": "ok" }))
}

// ── Status ─────────────────────────────────────────────────────────

/// The full console snapshot returned by `GET /api/v1/status`.
#[derive(Serialize)]
pub struct StatusResponse {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub host: report::HostSnapshot,
    pub disk: report::DiskReport,
    pub services: Vec<report::ServiceReport>,
    pub containers: Vec<report::ContainerReport>,
    pub probes: Vec<ProbeView>,
}

/// One probe row: definition summary, latest run, derived freshness.
#[derive(Serialize)]
pub struct ProbeView {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub enabled: bool,
    pub interval_seconds: u64,
    pub stale_after_seconds: u64,
    pub has_run: bool,
    pub is_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<ProbeRun>,
}

/// GET /api/v1/status
pub async fn get_status<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
) -> impl IntoResponse {
    let probes = match probe_views(&state) {
        Ok(views) => views,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    let mut services = Vec::new();
    for name in &state.config.targets.services {
        services.push(report::service_status(name).await);
    }
    let containers = report::container_reports(&state.config.targets.containers).await;

    ApiResponse::ok(StatusResponse {
        timestamp_ms: epoch_ms(),
        host: report::host_snapshot(),
        disk: report::disk_report(&state.config.disk),
        services,
        containers,
        probes,
    })
    .into_response()
}

fn probe_views<E, T>(state: &ApiState<E, T>) -> Result<Vec<ProbeView>, opsgate_state::StateError> {
    let now_ms = epoch_ms();
    let mut views = Vec::new();
    for def in state.registry.all() {
        let freshness = state
            .store
            .freshness(&def.key, def.stale_after_seconds, now_ms)?;
        let last_run = state.store.latest_run_for(&def.key)?;
        let age_seconds = match freshness {
            Freshness::Fresh { age_seconds } | Freshness::Stale { age_seconds } => {
                Some(age_seconds)
            }
            Freshness::NeverRun => None,
        };
        views.push(ProbeView {
            key: def.key.clone(),
            kind: def.kind.as_str(),
            enabled: def.enabled,
            interval_seconds: def.interval_seconds,
            stale_after_seconds: def.stale_after_seconds,
            has_run: freshness.has_run(),
            is_stale: freshness.is_stale(),
            age_seconds,
            last_run,
        });
    }
    Ok(views)
}

// ── Probes ─────────────────────────────────────────────────────────

/// GET /api/v1/probes
pub async fn list_probes<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
) -> impl IntoResponse {
    match probe_views(&state) {
        Ok(views) => ApiResponse::ok(views).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub key: String,
    pub limit: Option<usize>,
}

/// GET /api/v1/probes/history?key=...&limit=...
pub async fn probe_history<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    if !state.registry.contains(&query.key) {
        return error_response("unknown probe", StatusCode::NOT_FOUND).into_response();
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    match state.store.probe_history(&query.key, limit) {
        Ok(runs) => ApiResponse::ok(runs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

#[derive(Deserialize)]
pub struct RunRequest {
    pub key: String,
}

/// POST /api/v1/probes/run
pub async fn run_probe<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    match state.scheduler.run_now(&request.key).await {
        Ok(run) => ApiResponse::ok(run).into_response(),
        Err(e @ SchedulerError::UnknownProbe(_)) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e @ SchedulerError::AlreadyRunning(_)) => {
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e @ SchedulerError::State(_)) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Actions ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ActionBody {
    pub target_type: String,
    pub action: String,
    pub target: String,
    #[serde(default)]
    pub reason: String,
}

/// POST /api/v1/action
pub async fn perform_action<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ActionBody>,
) -> impl IntoResponse {
    let request = ActionRequest {
        target_type: body.target_type,
        action: body.action,
        target: body.target,
        actor: actor_from(&headers),
        remote_ip: addr.ip().to_string(),
        reason: body.reason,
    };

    match state.actions.perform(&request).await {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e @ ActionError::UnknownTarget(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e @ ActionError::NotAllowed(_)) => {
            error_response(&e.to_string(), StatusCode::FORBIDDEN).into_response()
        }
        Err(e @ ActionError::HelperUnavailable(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_GATEWAY).into_response()
        }
        Err(e @ ActionError::AuditFailed(_)) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Audit ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/audit?limit=...
pub async fn list_audit<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    match state.store.list_audit(limit) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

// ── Config ─────────────────────────────────────────────────────────

/// GET /api/v1/config — the safe subset only.
pub async fn get_config<E: ProbeExecutor, T: HelperTransport>(
    State(state): State<ApiState<E, T>>,
) -> impl IntoResponse {
    ApiResponse::ok(state.config.safe_view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use opsgate_actions::ActionExecutor;
    use opsgate_core::{
        ActionsConfig, OpsgateConfig, ProbeConfig, ProbeDefinition, ProbeParams, ProbeRegistry,
        TargetsConfig,
    };
    use opsgate_helper::{Allowlist, HelperOutcome, HelperRequest, HelperResponse};
    use opsgate_scheduler::ProbeScheduler;
    use opsgate_state::StateStore;

    use crate::TokenGuard;

    /// Instant executor producing healthy runs.
    struct InstantExecutor;

    impl ProbeExecutor for InstantExecutor {
        fn run_probe(
            &self,
            def: &ProbeDefinition,
        ) -> impl std::future::Future<Output = ProbeRun> + Send {
            let key = def.key.clone();
            async move {
                let now = epoch_ms();
                ProbeRun {
                    probe_key: key,
                    started_at_ms: now,
                    finished_at_ms: now,
                    ok: true,
                    status: "healthy".to_string(),
                    latency_ms: 0.0,
                    error: None,
                    steps: Vec::new(),
                }
            }
        }
    }

    /// Transport that always reports a clean success.
    struct OkTransport;

    impl HelperTransport for OkTransport {
        fn execute(
            &self,
            _request: &HelperRequest,
        ) -> impl std::future::Future<Output = HelperOutcome> + Send {
            std::future::ready(HelperOutcome::Completed(HelperResponse::success(
                0,
                "done".to_string(),
                String::new(),
            )))
        }
    }

    fn test_state() -> ApiState<InstantExecutor, OkTransport> {
        let mut config = OpsgateConfig::default();
        config.targets = TargetsConfig {
            services: vec!["nginx".to_string()],
            containers: vec![],
        };
        config.actions = ActionsConfig {
            service: vec!["restart".to_string()],
            container: vec![],
        };
        config.probes = vec![ProbeConfig {
            key: "db".to_string(),
            kind: "tcp_check".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            stale_after_seconds: None,
            enabled: true,
            params: ProbeParams {
                port: Some(5432),
                ..Default::default()
            },
        }];

        let registry = Arc::new(ProbeRegistry::from_config(&config.probes).unwrap());
        let store = StateStore::open_in_memory().unwrap();
        let allowlist = Allowlist::from_config(&config.targets, &config.actions);

        ApiState {
            store: store.clone(),
            registry: Arc::clone(&registry),
            scheduler: ProbeScheduler::new(registry, store.clone(), InstantExecutor),
            actions: Arc::new(ActionExecutor::new(allowlist, OkTransport, store)),
            config: Arc::new(config),
            token: TokenGuard::new(Some("token".to_string())),
        }
    }

    fn addr() -> ConnectInfo<SocketAddr> {
        ConnectInfo("127.0.0.1:55000".parse().unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = health().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_probes_shows_never_run() {
        let state = test_state();
        let resp = list_probes(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn probe_view_tracks_freshness() {
        let state = test_state();
        let views = probe_views(&state).unwrap();
        assert_eq!(views.len(), 1);
        assert!(!views[0].has_run);
        assert!(!views[0].is_stale);
        assert_eq!(views[0].age_seconds, None);

        state.scheduler.run_now("db").await.unwrap();
        let views = probe_views(&state).unwrap();
        assert!(views[0].has_run);
        assert!(!views[0].is_stale);
        assert_eq!(views[0].age_seconds, Some(0));
        assert!(views[0].last_run.as_ref().unwrap().ok);
    }

    #[tokio::test]
    async fn run_probe_unknown_is_404() {
        let state = test_state();
        let resp = run_probe(
            State(state),
            Json(RunRequest {
                key: "nope".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_probe_returns_completed_run() {
        let state = test_state();
        let resp = run_probe(
            State(state.clone()),
            Json(RunRequest {
                key: "db".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.store.latest_run_for("db").unwrap().is_some());
    }

    #[tokio::test]
    async fn history_unknown_key_is_404() {
        let state = test_state();
        let resp = probe_history(
            State(state),
            Query(HistoryQuery {
                key: "nope".to_string(),
                limit: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn action_success_writes_audit() {
        let state = test_state();
        let resp = perform_action(
            State(state.clone()),
            addr(),
            HeaderMap::new(),
            Json(ActionBody {
                target_type: "service".to_string(),
                action: "restart".to_string(),
                target: "nginx".to_string(),
                reason: "test".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let audit = state.store.list_audit(10).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].actor, "unknown");
        assert_eq!(audit[0].remote_ip, "127.0.0.1");
    }

    #[tokio::test]
    async fn action_denial_is_403_and_audited() {
        let state = test_state();
        let resp = perform_action(
            State(state.clone()),
            addr(),
            HeaderMap::new(),
            Json(ActionBody {
                target_type: "service".to_string(),
                action: "restart".to_string(),
                target: "sshd".to_string(),
                reason: String::new(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.store.list_audit(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn action_bad_target_type_is_400() {
        let state = test_state();
        let resp = perform_action(
            State(state),
            addr(),
            HeaderMap::new(),
            Json(ActionBody {
                target_type: "host".to_string(),
                action: "restart".to_string(),
                target: "nginx".to_string(),
                reason: String::new(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn audit_listing_is_most_recent_first() {
        let state = test_state();
        for target in ["nginx", "nginx"] {
            let _ = perform_action(
                State(state.clone()),
                addr(),
                HeaderMap::new(),
                Json(ActionBody {
                    target_type: "service".to_string(),
                    action: "restart".to_string(),
                    target: target.to_string(),
                    reason: String::new(),
                }),
            )
            .await;
        }

        let resp = list_audit(State(state), Query(AuditQuery { limit: Some(1) }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn config_endpoint_never_leaks_credentials() {
        let state = test_state();
        let view = state.config.safe_view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("nginx"));
        assert!(!json.to_lowercase().contains("token"));
    }
}
