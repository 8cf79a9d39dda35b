//! opsgate.toml configuration parser.
//!
//! One TOML file describes the whole console: the HTTP bind address, the
//! helper socket, the managed targets, the action policy, the scheduled
//! probes, and the disk report. The admin token is deliberately *not* part
//! of the file — it comes from the `OPSGATE_ADMIN_TOKEN` environment
//! variable so the config can be world-readable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid probe definition: {0}")]
    InvalidProbe(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsgateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
    #[serde(default)]
    pub disk: DiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub data_dir: PathBuf,
    /// Maximum accepted request body on POST routes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8765,
            data_dir: PathBuf::from("/var/lib/opsgate"),
            max_body_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Unix socket the privileged helper listens on.
    pub socket_path: PathBuf,
    /// Group that gets read/write access to the socket.
    pub socket_group: String,
    /// Client-side bound on one helper round-trip.
    pub request_timeout_seconds: u64,
    /// Helper-side bound on the underlying systemctl/docker command.
    pub command_timeout_seconds: u64,
    /// Maximum accepted RPC body, enforced on both sides.
    pub max_body_bytes: usize,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/opsgate/helper.sock"),
            socket_group: "opsgate".to_string(),
            request_timeout_seconds: 15,
            command_timeout_seconds: 45,
            max_body_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock period of the scheduler tick.
    pub tick_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_seconds: 2 }
    }
}

/// Names of the systemd units and docker containers the console manages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    pub services: Vec<String>,
    pub containers: Vec<String>,
}

/// Verbs permitted per target type. Parsed against the closed
/// [`ActionVerb`](crate::ActionVerb) set when the allowlist is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub service: Vec<String>,
    pub container: Vec<String>,
}

/// One `[[probes]]` table, as written in the file. Normalized into a
/// [`ProbeDefinition`](crate::ProbeDefinition) by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Staleness cutoff; defaults to `max(interval * 2, 120)`.
    pub stale_after_seconds: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub params: ProbeParams,
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Type-specific probe parameters. A closed, typed set — each probe kind
/// reads the fields it needs and treats missing optional configuration
/// (e.g. no DSN) as a skipped step, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeParams {
    // tcp_check
    pub host: Option<String>,
    pub port: Option<u16>,

    // http_check
    pub url: Option<String>,
    pub method: Option<String>,
    pub expected_status: Option<Vec<u16>>,
    pub allow_4xx: Option<bool>,

    // composite probes: gateway base + named endpoints
    pub base_url: Option<String>,
    pub request_data_url: Option<String>,
    pub get_data_url: Option<String>,

    // optional database-backed signals
    pub pg_dsn: Option<String>,
    /// Environment variable to read the DSN from when `pg_dsn` is unset.
    pub pg_dsn_env: Option<String>,
    pub max_outbox: Option<i64>,
    pub max_failed_recent: Option<i64>,
    pub outbox_count_query: Option<String>,
    pub failed_recent_query: Option<String>,
}

impl ProbeParams {
    /// Resolve the database connection string: explicit value wins, then the
    /// named environment variable. `None` means the DB steps are skipped.
    pub fn resolve_dsn(&self) -> Option<String> {
        if let Some(dsn) = self.pg_dsn.as_deref() {
            let dsn = dsn.trim();
            if !dsn.is_empty() {
                return Some(dsn.to_string());
            }
        }
        let var = self.pg_dsn_env.as_deref().unwrap_or("OPSGATE_PG_DSN");
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Mount points included in the per-filesystem report.
    pub mounts: Vec<String>,
    /// Directories whose recursive size is tracked.
    pub watch_paths: Vec<WatchedPath>,
    /// Percentage of used space that raises an alert.
    pub used_pct_warn: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            mounts: vec!["/".to_string()],
            watch_paths: Vec::new(),
            used_pct_warn: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedPath {
    pub path: PathBuf,
    /// Size in bytes above which the path is flagged.
    pub warn_bytes: Option<u64>,
}

impl OpsgateConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: OpsgateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// The subset safe to expose over `GET /api/v1/config`: targets, action
    /// policy, and probe definitions. Never credentials.
    pub fn safe_view(&self) -> HashMap<String, serde_json::Value> {
        let mut view = HashMap::new();
        if let Ok(v) = serde_json::to_value(&self.targets) {
            view.insert("targets".to_string(), v);
        }
        if let Ok(v) = serde_json::to_value(&self.actions) {
            view.insert("actions".to_string(), v);
        }
        if let Ok(v) = serde_json::to_value(&self.probes) {
            view.insert("probes".to_string(), v);
        }
        view
    }
}
