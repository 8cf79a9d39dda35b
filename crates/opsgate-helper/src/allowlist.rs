//! The two-sided action allowlist.
//!
//! Built from the shared config file and evaluated independently by the
//! console process and the helper daemon. A request must name both a
//! permitted verb for the target type and a configured target; anything
//! else is refused with a [`Denial`] that says which side failed.

use std::collections::HashSet;

use opsgate_core::{ActionVerb, ActionsConfig, TargetType, TargetsConfig};

/// Why a request was refused. Both variants are policy refusals, not
/// failures; they map to 403 at the API edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    ActionNotAllowed {
        target_type: TargetType,
        action: ActionVerb,
    },
    TargetNotAllowed {
        target_type: TargetType,
        target: String,
    },
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::ActionNotAllowed {
                target_type,
                action,
            } => write!(f, "action '{action}' is not allowed for {target_type}"),
            Denial::TargetNotAllowed {
                target_type,
                target,
            } => write!(f, "{target_type} '{target}' is not in allowlist"),
        }
    }
}

/// Immutable action policy loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    services: HashSet<String>,
    containers: HashSet<String>,
    service_actions: HashSet<ActionVerb>,
    container_actions: HashSet<ActionVerb>,
}

impl Allowlist {
    /// Build from config. Unknown verbs in the config are dropped rather
    /// than granted; empty entries are ignored.
    pub fn from_config(targets: &TargetsConfig, actions: &ActionsConfig) -> Self {
        Self {
            services: clean_names(&targets.services),
            containers: clean_names(&targets.containers),
            service_actions: parse_verbs(&actions.service),
            container_actions: parse_verbs(&actions.container),
        }
    }

    /// Check a request against the policy. Verb first, then target, so the
    /// denial names the narrowest violated rule.
    pub fn check(
        &self,
        target_type: TargetType,
        action: ActionVerb,
        target: &str,
    ) -> Result<(), Denial> {
        let (verbs, targets) = match target_type {
            TargetType::Service => (&self.service_actions, &self.services),
            TargetType::Container => (&self.container_actions, &self.containers),
        };

        if !verbs.contains(&action) {
            return Err(Denial::ActionNotAllowed {
                target_type,
                action,
            });
        }
        if !targets.contains(target.trim()) {
            return Err(Denial::TargetNotAllowed {
                target_type,
                target: target.to_string(),
            });
        }
        Ok(())
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    pub fn containers(&self) -> impl Iterator<Item = &str> {
        self.containers.iter().map(String::as_str)
    }
}

fn clean_names(raw: &[String]) -> HashSet<String> {
    raw.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_verbs(raw: &[String]) -> HashSet<ActionVerb> {
    raw.iter().filter_map(|s| s.parse().ok()).collect()
}
