//! opsgate-core — shared types, configuration, and the probe registry.
//!
//! Everything here is loaded once at startup and immutable for the process
//! lifetime: the `opsgate.toml` configuration, the normalized
//! [`ProbeDefinition`]s in the [`ProbeRegistry`], and the action vocabulary
//! ([`TargetType`], [`ActionVerb`]) shared between the API process and the
//! privileged helper.

pub mod config;
pub mod registry;

pub use config::{
    ActionsConfig, ConfigError, DiskConfig, HelperConfig, OpsgateConfig, ProbeConfig,
    ProbeParams, SchedulerConfig, ServerConfig, TargetsConfig, WatchedPath,
};
pub use registry::{ProbeDefinition, ProbeKind, ProbeRegistry, STALE_GRACE_FACTOR};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of system target an administrative action operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// A systemd unit.
    Service,
    /// A docker container.
    Container,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Service => write!(f, "service"),
            TargetType::Container => write!(f, "container"),
        }
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "service" => Ok(TargetType::Service),
            "container" => Ok(TargetType::Container),
            other => Err(format!("invalid target_type '{other}', use service|container")),
        }
    }
}

/// The closed set of lifecycle verbs the console can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionVerb {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionVerb::Start => write!(f, "start"),
            ActionVerb::Stop => write!(f, "stop"),
            ActionVerb::Restart => write!(f, "restart"),
        }
    }
}

impl FromStr for ActionVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(ActionVerb::Start),
            "stop" => Ok(ActionVerb::Stop),
            "restart" => Ok(ActionVerb::Restart),
            other => Err(format!("invalid action '{other}', use start|stop|restart")),
        }
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_type_round_trips() {
        assert_eq!("service".parse::<TargetType>().unwrap(), TargetType::Service);
        assert_eq!("container".parse::<TargetType>().unwrap(), TargetType::Container);
        assert_eq!(TargetType::Service.to_string(), "service");
        assert!("host".parse::<TargetType>().is_err());
    }

    #[test]
    fn action_verb_round_trips() {
        assert_eq!("restart".parse::<ActionVerb>().unwrap(), ActionVerb::Restart);
        assert_eq!(ActionVerb::Stop.to_string(), "stop");
        assert!("kill".parse::<ActionVerb>().is_err());
    }

    #[test]
    fn epoch_ms_is_after_2024() {
        assert!(epoch_ms() > 1_704_067_200_000);
    }
}
