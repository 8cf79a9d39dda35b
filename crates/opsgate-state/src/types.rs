//! Domain types persisted by the opsgate state store.

use serde::{Deserialize, Serialize};

/// One step inside a (possibly composite) probe run.
///
/// A skipped step records why its precondition was absent (e.g. no DSN
/// configured) and never counts against the run's overall `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeStep {
    pub name: String,
    pub ok: bool,
    #[serde(default)]
    pub skipped: bool,
    /// Step-specific measurements (latency, status code, counts, ...).
    #[serde(default)]
    pub detail: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeStep {
    /// Whether this step counts as passing: skipped steps always do.
    pub fn passes(&self) -> bool {
        self.skipped || self.ok
    }
}

/// One completed probe execution. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRun {
    pub probe_key: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub ok: bool,
    /// Short label: `healthy`, `degraded`, or `error`.
    pub status: String,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Vec<ProbeStep>,
}

/// Freshness of a probe's most recent result, derived at read time.
///
/// A probe with zero recorded runs is `NeverRun` — deliberately distinct
/// from both stale and healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    NeverRun,
    Fresh { age_seconds: u64 },
    Stale { age_seconds: u64 },
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale { .. })
    }

    pub fn has_run(&self) -> bool {
        !matches!(self, Freshness::NeverRun)
    }
}

/// One administrative action attempt — the durable compliance trail.
///
/// Written exactly once per attempt, including denials and failures;
/// never reordered or retroactively edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp_ms: u64,
    pub actor: String,
    #[serde(default)]
    pub remote_ip: String,
    pub target_type: String,
    pub target: String,
    pub action: String,
    #[serde(default)]
    pub reason: String,
    /// Whether the underlying action actually executed successfully.
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Outcome detail: stderr, denial reason, or transport failure.
    #[serde(default)]
    pub detail: String,
}
