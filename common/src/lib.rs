//! Shared types for the agent coordination runtime.
//!
//! This crate holds the vocabulary spoken by every component:
//! - Agent lifecycle state, status snapshots and configuration
//! - The closed event catalog used by the pub-sub bus
//! - Configuration-time error types
//!
//! External collaborators (dashboards, bots, config loaders) depend on this
//! crate without pulling in the runtime itself.

pub mod agent;
pub mod error;
pub mod events;

// Re-export commonly used types
pub use agent::{
    clamp_interval, AgentConfig, AgentSnapshot, AgentState, DEFAULT_INTERVAL_SECS,
    MAX_INTERVAL_SECS, MIN_INTERVAL_SECS,
};
pub use error::CoreError;
pub use events::{event_catalog, Event, EventType};
