//! opsgate-api — REST API for the operations console.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/health` | Liveness (no auth) |
//! | GET | `/api/v1/status` | Host, disk, service, container, probe snapshot |
//! | GET | `/api/v1/probes` | Latest row per configured probe |
//! | GET | `/api/v1/probes/history?key&limit` | Run history for one probe |
//! | POST | `/api/v1/probes/run` | Run a probe immediately |
//! | POST | `/api/v1/action` | Execute a privileged action |
//! | GET | `/api/v1/audit?limit` | Most-recent-first audit rows |
//! | GET | `/api/v1/config` | Safe config subset (never the token) |
//!
//! Every route except health requires the `X-Opsgate-Token` header.

pub mod auth;
pub mod handlers;
pub mod report;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use opsgate_actions::{ActionExecutor, HelperTransport};
use opsgate_core::{OpsgateConfig, ProbeRegistry};
use opsgate_probes::ProbeExecutor;
use opsgate_scheduler::ProbeScheduler;
use opsgate_state::StateStore;

pub use auth::TokenGuard;

/// Shared state for API handlers.
pub struct ApiState<E, T> {
    pub store: StateStore,
    pub registry: Arc<ProbeRegistry>,
    pub scheduler: ProbeScheduler<E>,
    pub actions: Arc<ActionExecutor<T>>,
    pub config: Arc<OpsgateConfig>,
    pub token: TokenGuard,
}

impl<E, T> Clone for ApiState<E, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: Arc::clone(&self.registry),
            scheduler: self.scheduler.clone(),
            actions: Arc::clone(&self.actions),
            config: Arc::clone(&self.config),
            token: self.token.clone(),
        }
    }
}

/// Build the complete API router.
pub fn build_router<E, T>(state: ApiState<E, T>) -> Router
where
    E: ProbeExecutor,
    T: HelperTransport + 'static,
{
    let max_body = state.config.server.max_body_bytes;

    let protected = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/probes", get(handlers::list_probes))
        .route("/probes/history", get(handlers::probe_history))
        .route("/probes/run", post(handlers::run_probe))
        .route("/action", post(handlers::perform_action))
        .route("/audit", get(handlers::list_audit))
        .route("/config", get(handlers::get_config))
        .route_layer(axum::middleware::from_fn_with_state(
            state.token.clone(),
            auth::require_token,
        ))
        .with_state(state);

    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .route("/health", get(handlers::health))
                .merge(protected),
        )
        .layer(DefaultBodyLimit::max(max_body))
}
