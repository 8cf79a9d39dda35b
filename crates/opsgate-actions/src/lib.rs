//! opsgate-actions — orchestration of privileged actions.
//!
//! `perform` is the single entry point the API calls: allowlist check,
//! helper round-trip, audit append, in that order. Every attempt writes
//! exactly one audit record before the caller sees anything, including
//! denials and helper outages. If the audit append itself fails, the
//! whole action is reported as failed even when the mutation went through.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use opsgate_core::{ActionVerb, TargetType, epoch_ms};
use opsgate_helper::{Allowlist, HelperClient, HelperOutcome, HelperRequest, HelperResponse};
use opsgate_state::{AuditRecord, StateStore};

/// How an action attempt failed before producing a command result.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Refused by the console-side allowlist. 403 at the API edge.
    #[error("{0}")]
    NotAllowed(String),

    /// The request named an unparseable target type, verb, or empty target.
    #[error("{0}")]
    UnknownTarget(String),

    /// The helper could not be reached or did not answer in time.
    #[error("helper unavailable: {0}")]
    HelperUnavailable(String),

    /// The action may have executed, but the audit trail could not record
    /// it. Reported as a failure regardless of what the command did.
    #[error("audit append failed: {0}")]
    AuditFailed(#[from] opsgate_state::StateError),
}

/// The outcome of an executed (not refused) action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Failure class from the helper when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One incoming action request, fields still raw from the HTTP layer.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub target_type: String,
    pub action: String,
    pub target: String,
    pub actor: String,
    pub remote_ip: String,
    pub reason: String,
}

/// Seam for the helper round-trip so audit behavior is testable without a
/// live socket.
pub trait HelperTransport: Send + Sync {
    fn execute(
        &self,
        request: &HelperRequest,
    ) -> impl std::future::Future<Output = HelperOutcome> + Send;
}

impl HelperTransport for HelperClient {
    fn execute(
        &self,
        request: &HelperRequest,
    ) -> impl std::future::Future<Output = HelperOutcome> + Send {
        HelperClient::execute(self, request)
    }
}

/// Executes actions: console-side policy, helper transport, audit trail.
pub struct ActionExecutor<T> {
    allowlist: Allowlist,
    transport: T,
    store: StateStore,
}

impl<T: HelperTransport> ActionExecutor<T> {
    pub fn new(allowlist: Allowlist, transport: T, store: StateStore) -> Self {
        Self {
            allowlist,
            transport,
            store,
        }
    }

    /// Run one action end to end. Operational failure (the command ran and
    /// exited non-zero) is an `Ok` with `ok=false`; anything that prevented
    /// the command from running and being recorded is an `Err`.
    pub async fn perform(&self, request: &ActionRequest) -> Result<ActionResult, ActionError> {
        let target_type: TargetType = request
            .target_type
            .parse()
            .map_err(ActionError::UnknownTarget)?;
        let action: ActionVerb = request.action.parse().map_err(ActionError::UnknownTarget)?;
        let target = request.target.trim().to_string();
        if target.is_empty() {
            return Err(ActionError::UnknownTarget("target is required".to_string()));
        }

        if let Err(denial) = self.allowlist.check(target_type, action, &target) {
            warn!(
                target_type = %target_type,
                action = %action,
                target = %target,
                actor = %request.actor,
                "action refused by allowlist"
            );
            let message = denial.to_string();
            self.audit(request, target_type, action, &target, false, None, &message)?;
            return Err(ActionError::NotAllowed(message));
        }

        let helper_request = HelperRequest {
            target_type,
            action,
            target: target.clone(),
            actor: request.actor.clone(),
            reason: request.reason.clone(),
        };

        match self.transport.execute(&helper_request).await {
            HelperOutcome::Completed(response) => {
                self.record_completed(request, target_type, action, &target, response)
            }
            HelperOutcome::Unavailable(reason) => {
                error!(target = %target, reason = %reason, "helper unavailable");
                self.audit(request, target_type, action, &target, false, None, &reason)?;
                Err(ActionError::HelperUnavailable(reason))
            }
        }
    }

    fn record_completed(
        &self,
        request: &ActionRequest,
        target_type: TargetType,
        action: ActionVerb,
        target: &str,
        response: HelperResponse,
    ) -> Result<ActionResult, ActionError> {
        let detail = if response.ok {
            String::new()
        } else if !response.stderr.is_empty() {
            response.stderr.clone()
        } else {
            response.detail.clone().unwrap_or_default()
        };
        self.audit(
            request,
            target_type,
            action,
            target,
            response.ok,
            Some(response.exit_code),
            &detail,
        )?;

        info!(
            target_type = %target_type,
            action = %action,
            target,
            actor = %request.actor,
            ok = response.ok,
            exit_code = response.exit_code,
            "action completed"
        );
        Ok(ActionResult {
            ok: response.ok,
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            detail: response.detail,
        })
    }

    /// The one audit append per attempt. Failure escalates the action.
    fn audit(
        &self,
        request: &ActionRequest,
        target_type: TargetType,
        action: ActionVerb,
        target: &str,
        ok: bool,
        exit_code: Option<i32>,
        detail: &str,
    ) -> Result<u64, ActionError> {
        let record = AuditRecord {
            timestamp_ms: epoch_ms(),
            actor: request.actor.clone(),
            remote_ip: request.remote_ip.clone(),
            target_type: target_type.to_string(),
            target: target.to_string(),
            action: action.to_string(),
            reason: request.reason.clone(),
            ok,
            exit_code,
            detail: detail.to_string(),
        };
        Ok(self.store.append_audit(&record)?)
    }
}
