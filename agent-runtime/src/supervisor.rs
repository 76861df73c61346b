//! Supervisor: periodic health poller, independent of whichever driver runs
//! the agents.
//!
//! Each pass snapshots every watched agent's status into a live report map and
//! restarts any agent stuck in an error state. Trouble while handling one
//! agent never stops the pass for the others; a failed restart is picked up
//! again on the next pass because the agent is still in error state.

use crate::agent::ManagedAgent;
use crate::storage::Persistence;
use anyhow::{bail, Result};
use chrono::Utc;
use common::{AgentSnapshot, CoreError};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct Supervisor {
    agents: HashMap<String, Arc<ManagedAgent>>,
    check_interval: Duration,
    persistence: Option<Arc<dyn Persistence>>,
    last_status: Arc<DashMap<String, AgentSnapshot>>,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(agents: HashMap<String, Arc<ManagedAgent>>, check_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            agents,
            check_interval,
            persistence: None,
            last_status: Arc::new(DashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            loop_handle: Mutex::new(None),
        }
    }

    /// Record restart events durably through the given store.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Start the health-check loop in a background task.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!(CoreError::AlreadyRunning("supervisor"));
        }
        self.shutdown.send_replace(false);
        info!("Supervisor monitoring started");

        let agents = self.agents.clone();
        let check_interval = self.check_interval;
        let persistence = self.persistence.clone();
        let last_status = Arc::clone(&self.last_status);
        let running = Arc::clone(&self.running);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                Self::check_pass(&agents, &last_status, persistence.as_deref()).await;
                tokio::select! {
                    _ = tokio::time::sleep(check_interval) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop monitoring. Idempotent; watched agents are left as they are.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        info!("Supervisor monitoring stopped");
    }

    /// Latest completed status snapshot per agent, readable at any time.
    pub fn get_report(&self) -> HashMap<String, AgentSnapshot> {
        self.last_status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn check_pass(
        agents: &HashMap<String, Arc<ManagedAgent>>,
        last_status: &DashMap<String, AgentSnapshot>,
        persistence: Option<&dyn Persistence>,
    ) {
        for (name, agent) in agents {
            let snapshot = agent.status().await;
            last_status.insert(name.clone(), snapshot.clone());

            if snapshot.state.is_error() {
                warn!("Detected error state in '{}': {}", name, snapshot.state);
                if let Err(e) = Self::restart_agent(name, agent, persistence).await {
                    error!("Failed to restart '{}': {}", name, e);
                }
            }
        }
    }

    /// Restart sequence: record the event durably, then stop, reactivate and
    /// re-launch the agent in a fresh task. The durable record comes first so
    /// that a persistence failure leaves the agent in error state for the
    /// next pass to retry.
    async fn restart_agent(
        name: &str,
        agent: &Arc<ManagedAgent>,
        persistence: Option<&dyn Persistence>,
    ) -> Result<()> {
        info!("Restarting agent '{}'", name);
        if let Some(store) = persistence {
            store
                .append_log(
                    name,
                    json!({"restarted_at": Utc::now(), "reason": agent.status().await.state.to_string()}),
                )
                .await?;
        }

        agent.stop().await;
        agent.mark_restarted().await;
        let relaunched = Arc::clone(agent);
        tokio::spawn(async move {
            relaunched.execute().await;
        });
        info!("Agent '{}' restarted", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLogic;
    use crate::storage::MemoryStore;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use common::{AgentConfig, AgentState};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU64;
    use tokio::time::{sleep, Duration};

    /// Fails on its first run, succeeds afterwards.
    struct FlakyOnce {
        runs: AtomicU64,
    }

    #[async_trait]
    impl AgentLogic for FlakyOnce {
        async fn run(&self) -> Result<Value> {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow!("rpc timeout"));
            }
            Ok(json!("recovered"))
        }
    }

    fn flaky() -> Arc<ManagedAgent> {
        Arc::new(ManagedAgent::new(
            "flaky",
            Box::new(FlakyOnce {
                runs: AtomicU64::new(0),
            }),
            AgentConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_failed_agent_restarted_within_one_pass() {
        let agent = flaky();
        agent.execute().await;
        assert!(agent.status().await.state.is_error());

        let mut agents = HashMap::new();
        agents.insert("flaky".to_string(), Arc::clone(&agent));
        let store = Arc::new(MemoryStore::new());
        let supervisor = Supervisor::new(agents, Duration::from_millis(50))
            .with_persistence(Arc::clone(&store) as Arc<dyn Persistence>);

        supervisor.start().await.unwrap();
        sleep(Duration::from_millis(200)).await;
        supervisor.stop().await;

        let snapshot = agent.status().await;
        assert!(snapshot.active);
        assert!(!snapshot.state.is_error());

        // The restart left a durable record.
        let history = store.log_history("flaky").await.unwrap();
        assert!(!history.is_empty());
        assert!(history[0].event["reason"]
            .as_str()
            .unwrap()
            .starts_with("Error"));
    }

    #[tokio::test]
    async fn test_report_reflects_latest_snapshot() {
        let agent = flaky();
        let mut agents = HashMap::new();
        agents.insert("flaky".to_string(), Arc::clone(&agent));
        let supervisor = Supervisor::new(agents, Duration::from_millis(50));

        supervisor.start().await.unwrap();
        sleep(Duration::from_millis(120)).await;
        supervisor.stop().await;

        let report = supervisor.get_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report["flaky"].name, "flaky");
    }

    #[tokio::test]
    async fn test_healthy_agents_left_alone() {
        let agent = flaky();
        // Second run succeeds, so prime it past the failure first.
        agent.execute().await;
        agent.mark_restarted().await;
        agent.execute().await;
        assert_eq!(agent.status().await.state, AgentState::Running);

        let mut agents = HashMap::new();
        agents.insert("flaky".to_string(), Arc::clone(&agent));
        let supervisor = Supervisor::new(agents, Duration::from_millis(50));
        supervisor.start().await.unwrap();
        sleep(Duration::from_millis(120)).await;
        supervisor.stop().await;

        // No restart: state is whatever the last execute left, not Restarted.
        assert_eq!(agent.status().await.state, AgentState::Running);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let supervisor = Supervisor::new(HashMap::new(), Duration::from_millis(50));
        supervisor.start().await.unwrap();
        supervisor.stop().await;
        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }
}
