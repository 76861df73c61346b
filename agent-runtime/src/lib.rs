//! Agent Coordination Runtime
//!
//! This crate is the scheduling and coordination nucleus for a fleet of
//! autonomous agents. It provides:
//! - An agent abstraction (`AgentLogic` + `ManagedAgent`) with a safe
//!   execute/stop/status lifecycle
//! - A factory registry for constructing agents by name from opaque config
//! - A typed pub-sub event bus over a closed event catalog
//! - Three independent drivers over the same agent contract:
//!   the execution pipeline (queue + routing dataflow), the orchestration
//!   engine (barrier-synchronized schedule groups) and the interval runner
//!   (one timed loop per agent)
//! - A supervisor that detects failed agents and restarts them
//! - A feedback loop that tunes agent run intervals from scored outputs
//! - A persistence collaborator contract with in-memory and JSON-file stores

pub mod agent;
pub mod bus;
pub mod feedback;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod storage;
pub mod supervisor;

// Re-export commonly used types
pub use agent::{AgentLogic, ManagedAgent};
pub use bus::{EventBus, EventHandler};
pub use feedback::{FeedbackLoop, ScoringFn, FEEDBACK_WINDOW};
pub use orchestrator::{OrchestrationEngine, Schedule};
pub use pipeline::{ExecutionPipeline, OutputHandler};
pub use registry::AgentRegistry;
pub use runner::IntervalRunner;
pub use storage::{JsonFileStore, LogEntry, MemoryStore, Persistence};
pub use supervisor::Supervisor;

// Re-export shared types for convenience
pub use common::{AgentConfig, AgentSnapshot, AgentState, CoreError, Event, EventType};
