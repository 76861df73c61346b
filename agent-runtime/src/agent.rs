//! Agent abstraction: domain logic plugs in behind `AgentLogic`, the runtime
//! owns lifecycle state through `ManagedAgent`.
//!
//! Drivers (pipeline, orchestration engine, interval runner), the supervisor
//! and the feedback loop all share an agent as `Arc<ManagedAgent>` and interact
//! with it only through this module.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{clamp_interval, AgentConfig, AgentSnapshot, AgentState};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Domain logic contract implemented by concrete agents.
///
/// Implementations never deal with scheduling, restarts or status reporting;
/// they only produce outputs. An agent that consumes routed input overrides
/// `accepts_input` and `run_with_input`.
#[async_trait]
pub trait AgentLogic: Send + Sync {
    /// Produce one output with no external input.
    async fn run(&self) -> Result<Value>;

    /// Whether this agent consumes routed input.
    fn accepts_input(&self) -> bool {
        false
    }

    /// Produce one output from routed input. Default ignores the input.
    async fn run_with_input(&self, _input: Value) -> Result<Value> {
        self.run().await
    }
}

struct RunState {
    state: AgentState,
    last_run: Option<DateTime<Utc>>,
}

/// An agent under runtime management: domain logic plus supervised lifecycle
/// state (active flag, run interval, last-run timestamp, lifecycle state).
///
/// All mutation goes through the methods below; `interval_secs` is also
/// written by the feedback loop as a documented tuning side-channel, so reads
/// and writes use atomics.
pub struct ManagedAgent {
    name: String,
    logic: Box<dyn AgentLogic>,
    config: AgentConfig,
    active: AtomicBool,
    interval_secs: AtomicU64,
    run_state: RwLock<RunState>,
}

impl std::fmt::Debug for ManagedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedAgent")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .field("interval_secs", &self.interval_secs())
            .finish_non_exhaustive()
    }
}

impl ManagedAgent {
    pub fn new(name: impl Into<String>, logic: Box<dyn AgentLogic>, config: AgentConfig) -> Self {
        let name = name.into();
        let interval_secs = clamp_interval(config.interval_secs);
        info!("Agent '{}' initialized with interval {}s", name, interval_secs);
        Self {
            name,
            logic,
            config,
            active: AtomicBool::new(true),
            interval_secs: AtomicU64::new(interval_secs),
            run_state: RwLock::new(RunState {
                state: AgentState::Initialized,
                last_run: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn accepts_input(&self) -> bool {
        self.logic.accepts_input()
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::SeqCst)
    }

    /// Update the run interval, clamped to the allowed range. Drivers pick the
    /// new value up on their next tick.
    pub fn set_interval_secs(&self, secs: u64) {
        self.interval_secs.store(clamp_interval(secs), Ordering::SeqCst);
    }

    /// Execute the agent's domain logic with no input.
    ///
    /// Returns the produced output, or `None` when the agent is inactive or
    /// its logic failed. Failures are recorded as `Error` state and never
    /// propagate to the caller.
    pub async fn execute(&self) -> Option<Value> {
        self.execute_inner(None).await
    }

    /// Execute with routed input. Agents that do not accept input are run
    /// plain, matching `execute()`.
    pub async fn execute_with_input(&self, input: Value) -> Option<Value> {
        self.execute_inner(Some(input)).await
    }

    async fn execute_inner(&self, input: Option<Value>) -> Option<Value> {
        if !self.is_active() {
            debug!("Agent '{}' is inactive, skipping execution", self.name);
            return None;
        }

        // Status is updated before invoking domain logic, so a supervisor
        // probing mid-run observes Running.
        {
            let mut run_state = self.run_state.write().await;
            run_state.last_run = Some(Utc::now());
            run_state.state = AgentState::Running;
        }

        let result = match input {
            Some(data) if self.logic.accepts_input() => self.logic.run_with_input(data).await,
            _ => self.logic.run().await,
        };

        match result {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("Agent '{}' failed: {}", self.name, e);
                self.run_state.write().await.state = AgentState::Error(e.to_string());
                None
            }
        }
    }

    /// Halt the agent. Idempotent; subsequent `execute` calls are no-ops.
    pub async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.run_state.write().await.state = AgentState::Stopped;
        info!("Agent '{}' stopped", self.name);
    }

    /// Supervisor hook: force the agent back to life after a failure.
    pub async fn mark_restarted(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.run_state.write().await.state = AgentState::Restarted;
        info!("Agent '{}' marked restarted", self.name);
    }

    /// Owned point-in-time snapshot for monitoring.
    pub async fn status(&self) -> AgentSnapshot {
        let run_state = self.run_state.read().await;
        AgentSnapshot {
            name: self.name.clone(),
            active: self.is_active(),
            last_run: run_state.last_run,
            state: run_state.state.clone(),
            interval_secs: self.interval_secs(),
        }
    }
}
