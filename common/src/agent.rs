//! Agent lifecycle state, status snapshots and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower bound for an agent's run interval (seconds).
pub const MIN_INTERVAL_SECS: u64 = 1;
/// Upper bound for an agent's run interval (seconds).
pub const MAX_INTERVAL_SECS: u64 = 30;
/// Interval used when the configuration does not specify one.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Lifecycle state of an agent.
///
/// Transitions: `Initialized` -> `Running` on each execution, -> `Error` on an
/// unhandled failure, -> `Stopped` when halted, -> `Restarted` when the
/// supervisor brings a failed agent back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AgentState {
    Initialized,
    Running,
    Stopped,
    Restarted,
    Error(String),
}

impl AgentState {
    pub fn is_error(&self) -> bool {
        matches!(self, AgentState::Error(_))
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Initialized => write!(f, "Initialized"),
            AgentState::Running => write!(f, "Running"),
            AgentState::Stopped => write!(f, "Stopped"),
            AgentState::Restarted => write!(f, "Restarted"),
            AgentState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Immutable point-in-time view of an agent, as returned by `status()`.
///
/// Snapshots are owned copies; they never expose internal mutable references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub state: AgentState,
    pub interval_secs: u64,
}

/// Opaque agent configuration.
///
/// The runtime only interprets `interval_secs`; everything else is carried in
/// `params` for the agent's own domain logic to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub interval_secs: u64,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            params: serde_json::Map::new(),
        }
    }
}

impl AgentConfig {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: clamp_interval(interval_secs),
            ..Default::default()
        }
    }

    /// Build a configuration from a raw key-value map, honoring an `interval`
    /// entry if present. This is the handoff point from external config loading.
    pub fn from_params(params: serde_json::Map<String, serde_json::Value>) -> Self {
        let interval_secs = params
            .get("interval")
            .and_then(serde_json::Value::as_u64)
            .map(clamp_interval)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        Self {
            interval_secs,
            params,
        }
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }
}

/// Clamp an interval into the allowed `[MIN_INTERVAL_SECS, MAX_INTERVAL_SECS]` range.
pub fn clamp_interval(secs: u64) -> u64 {
    secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_display() {
        assert_eq!(AgentState::Initialized.to_string(), "Initialized");
        assert_eq!(
            AgentState::Error("boom".to_string()).to_string(),
            "Error: boom"
        );
        assert!(AgentState::Error("boom".to_string()).is_error());
        assert!(!AgentState::Running.is_error());
    }

    #[test]
    fn test_config_from_params() {
        let mut params = serde_json::Map::new();
        params.insert("interval".to_string(), json!(7));
        params.insert("source".to_string(), json!("governance"));

        let config = AgentConfig::from_params(params);
        assert_eq!(config.interval_secs, 7);
        assert_eq!(config.param("source"), Some(&json!("governance")));
    }

    #[test]
    fn test_config_interval_clamped() {
        assert_eq!(AgentConfig::new(0).interval_secs, MIN_INTERVAL_SECS);
        assert_eq!(AgentConfig::new(90).interval_secs, MAX_INTERVAL_SECS);

        let mut params = serde_json::Map::new();
        params.insert("interval".to_string(), json!(120));
        assert_eq!(AgentConfig::from_params(params).interval_secs, MAX_INTERVAL_SECS);
    }

    #[test]
    fn test_config_default_interval() {
        let config = AgentConfig::from_params(serde_json::Map::new());
        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
    }
}
