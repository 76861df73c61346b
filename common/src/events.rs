//! The closed event catalog and the event envelope.
//!
//! Event types form a fixed set with documented semantics. Referring to a name
//! outside the catalog is a configuration error, not a runtime condition.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// All event types known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProposalCreated,
    ProposalUpdated,
    VoteCast,
    ValidatorChanged,
    TokenMoved,
    NewBlock,
    WalletActive,
    AlertTriggered,
    AgentError,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::ProposalCreated,
        EventType::ProposalUpdated,
        EventType::VoteCast,
        EventType::ValidatorChanged,
        EventType::TokenMoved,
        EventType::NewBlock,
        EventType::WalletActive,
        EventType::AlertTriggered,
        EventType::AgentError,
    ];

    /// Wire name, as used by configuration files and external subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            EventType::ProposalCreated => "proposal_created",
            EventType::ProposalUpdated => "proposal_updated",
            EventType::VoteCast => "vote_cast",
            EventType::ValidatorChanged => "validator_changed",
            EventType::TokenMoved => "token_moved",
            EventType::NewBlock => "new_block",
            EventType::WalletActive => "wallet_active",
            EventType::AlertTriggered => "alert_triggered",
            EventType::AgentError => "agent_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EventType::ProposalCreated => "A new governance proposal was submitted",
            EventType::ProposalUpdated => "Proposal metadata or state changed",
            EventType::VoteCast => "A wallet cast a vote on a proposal",
            EventType::ValidatorChanged => "Validator performance or role changed",
            EventType::TokenMoved => "Significant token movement detected",
            EventType::NewBlock => "A new block was observed on chain",
            EventType::WalletActive => "A monitored wallet became active",
            EventType::AlertTriggered => "An alert condition was met",
            EventType::AgentError => "An agent failed during execution",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| CoreError::UnknownEventType(s.to_string()))
    }
}

/// The full catalog as (name, description) rows, for dashboards and docs.
pub fn event_catalog() -> Vec<(&'static str, &'static str)> {
    EventType::ALL
        .iter()
        .map(|t| (t.name(), t.description()))
        .collect()
}

/// An emitted event. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            payload,
            emitted_at: Utc::now(),
        }
    }
}
