//! Probe registry — normalized, immutable probe definitions.
//!
//! Built once from the `[[probes]]` config tables at startup. Owns no
//! mutable state; the scheduler and API only ever read from it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ProbeConfig, ProbeParams};

/// Staleness grace multiplier applied to a probe's interval when the config
/// does not pin `stale_after_seconds` explicitly.
pub const STALE_GRACE_FACTOR: u64 = 2;

/// Floor for the derived staleness cutoff.
const STALE_FLOOR_SECONDS: u64 = 120;

/// Minimum accepted probe interval.
const MIN_INTERVAL_SECONDS: u64 = 5;

/// Minimum accepted probe timeout.
const MIN_TIMEOUT_SECONDS: u64 = 1;

/// The closed set of probe types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    TcpCheck,
    HttpCheck,
    SmsHealth,
    NidHealth,
}

impl ProbeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "tcp_check" => Some(ProbeKind::TcpCheck),
            "http_check" => Some(ProbeKind::HttpCheck),
            "sms_health" => Some(ProbeKind::SmsHealth),
            "nid_health" => Some(ProbeKind::NidHealth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::TcpCheck => "tcp_check",
            ProbeKind::HttpCheck => "http_check",
            ProbeKind::SmsHealth => "sms_health",
            ProbeKind::NidHealth => "nid_health",
        }
    }
}

/// A normalized scheduled probe. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDefinition {
    pub key: String,
    pub kind: ProbeKind,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub stale_after_seconds: u64,
    pub enabled: bool,
    pub params: ProbeParams,
}

/// Catalog of probe definitions keyed by probe key.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    probes: BTreeMap<String, ProbeDefinition>,
}

impl ProbeRegistry {
    /// Build a registry from raw config tables, rejecting duplicate or empty
    /// keys and unknown probe types, and clamping intervals/timeouts.
    pub fn from_config(configs: &[ProbeConfig]) -> Result<Self, ConfigError> {
        let mut probes = BTreeMap::new();
        for cfg in configs {
            let def = normalize(cfg)?;
            if probes.insert(def.key.clone(), def).is_some() {
                return Err(ConfigError::InvalidProbe(format!(
                    "duplicate probe key '{}'",
                    cfg.key
                )));
            }
        }
        Ok(Self { probes })
    }

    pub fn get(&self, key: &str) -> Option<&ProbeDefinition> {
        self.probes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.probes.contains_key(key)
    }

    /// All definitions, in key order.
    pub fn all(&self) -> impl Iterator<Item = &ProbeDefinition> {
        self.probes.values()
    }

    /// Only the enabled definitions, in key order.
    pub fn enabled(&self) -> impl Iterator<Item = &ProbeDefinition> {
        self.probes.values().filter(|d| d.enabled)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

fn normalize(cfg: &ProbeConfig) -> Result<ProbeDefinition, ConfigError> {
    let key = cfg.key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidProbe("probe key is required".to_string()));
    }
    // Keys become store key prefixes, so the separator is reserved.
    if key.contains(':') {
        return Err(ConfigError::InvalidProbe(format!(
            "probe key '{key}' must not contain ':'"
        )));
    }
    let kind = ProbeKind::parse(&cfg.kind).ok_or_else(|| {
        ConfigError::InvalidProbe(format!("probe '{key}' has unknown type '{}'", cfg.kind))
    })?;

    let interval_seconds = cfg.interval_seconds.max(MIN_INTERVAL_SECONDS);
    let timeout_seconds = cfg.timeout_seconds.max(MIN_TIMEOUT_SECONDS);
    let stale_after_seconds = cfg
        .stale_after_seconds
        .unwrap_or_else(|| (interval_seconds * STALE_GRACE_FACTOR).max(STALE_FLOOR_SECONDS))
        .max(10);

    Ok(ProbeDefinition {
        key: key.to_string(),
        kind,
        interval_seconds,
        timeout_seconds,
        stale_after_seconds,
        enabled: cfg.enabled,
        params: cfg.params.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(key: &str, kind: &str) -> ProbeConfig {
        ProbeConfig {
            key: key.to_string(),
            kind: kind.to_string(),
            interval_seconds: 60,
            timeout_seconds: 5,
            stale_after_seconds: None,
            enabled: true,
            params: ProbeParams::default(),
        }
    }

    #[test]
    fn registry_from_config() {
        let registry =
            ProbeRegistry::from_config(&[probe("a", "tcp_check"), probe("b", "sms_health")])
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").unwrap().kind, ProbeKind::TcpCheck);
        assert!(registry.contains("b"));
        assert!(!registry.contains("c"));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let result = ProbeRegistry::from_config(&[probe("a", "tcp_check"), probe("a", "http_check")]);
        assert!(matches!(result, Err(ConfigError::InvalidProbe(_))));
    }

    #[test]
    fn unknown_kind_rejected() {
        let result = ProbeRegistry::from_config(&[probe("a", "ping_check")]);
        assert!(matches!(result, Err(ConfigError::InvalidProbe(_))));
    }

    #[test]
    fn empty_key_rejected() {
        let result = ProbeRegistry::from_config(&[probe("  ", "tcp_check")]);
        assert!(matches!(result, Err(ConfigError::InvalidProbe(_))));
    }

    #[test]
    fn colon_in_key_rejected() {
        let result = ProbeRegistry::from_config(&[probe("a:b", "tcp_check")]);
        assert!(matches!(result, Err(ConfigError::InvalidProbe(_))));
    }

    #[test]
    fn intervals_clamped() {
        let mut cfg = probe("a", "tcp_check");
        cfg.interval_seconds = 1;
        cfg.timeout_seconds = 0;
        let registry = ProbeRegistry::from_config(&[cfg]).unwrap();
        let def = registry.get("a").unwrap();
        assert_eq!(def.interval_seconds, 5);
        assert_eq!(def.timeout_seconds, 1);
    }

    #[test]
    fn stale_cutoff_defaults_to_grace_times_interval_with_floor() {
        let mut short = probe("short", "tcp_check");
        short.interval_seconds = 30;
        let mut long = probe("long", "tcp_check");
        long.interval_seconds = 300;
        let mut pinned = probe("pinned", "tcp_check");
        pinned.stale_after_seconds = Some(45);

        let registry = ProbeRegistry::from_config(&[short, long, pinned]).unwrap();
        // 30 * 2 = 60 is under the floor.
        assert_eq!(registry.get("short").unwrap().stale_after_seconds, 120);
        assert_eq!(registry.get("long").unwrap().stale_after_seconds, 600);
        assert_eq!(registry.get("pinned").unwrap().stale_after_seconds, 45);
    }

    #[test]
    fn enabled_filter() {
        let mut off = probe("off", "tcp_check");
        off.enabled = false;
        let registry = ProbeRegistry::from_config(&[probe("on", "tcp_check"), off]).unwrap();
        let enabled: Vec<_> = registry.enabled().map(|d| d.key.as_str()).collect();
        assert_eq!(enabled, vec!["on"]);
        assert_eq!(registry.all().count(), 2);
    }
}
