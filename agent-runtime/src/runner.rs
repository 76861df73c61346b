//! Interval runner: one timed loop per agent.
//!
//! The simplest of the three drivers: each agent gets its own task that
//! executes it, then sleeps for the agent's current interval. Because the
//! interval is re-read on every tick, feedback-loop adjustments apply from
//! the very next iteration. An error tick backs off briefly instead of
//! hammering a failing agent.

use crate::agent::ManagedAgent;
use anyhow::{bail, Result};
use common::{AgentSnapshot, CoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Sleep after a tick that left the agent in error state.
const ERROR_BACKOFF: Duration = Duration::from_secs(3);

pub struct IntervalRunner {
    agents: HashMap<String, Arc<ManagedAgent>>,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl IntervalRunner {
    pub fn new(agents: HashMap<String, Arc<ManagedAgent>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            agents,
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start one run loop per agent.
    pub async fn start_all(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!(CoreError::AlreadyRunning("interval runner"));
        }
        self.shutdown.send_replace(false);

        let mut handles = self.handles.lock().await;
        for (name, agent) in &self.agents {
            info!("Started run loop for agent '{}'", name);
            handles.push(tokio::spawn(Self::agent_loop(
                name.clone(),
                Arc::clone(agent),
                Arc::clone(&self.running),
                self.shutdown.subscribe(),
            )));
        }
        Ok(())
    }

    /// Stop every loop and every agent. Idempotent.
    pub async fn stop_all(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping all agent run loops");
        self.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        for agent in self.agents.values() {
            agent.stop().await;
        }
    }

    /// Status snapshot of every managed agent.
    pub async fn report(&self) -> HashMap<String, AgentSnapshot> {
        let mut report = HashMap::new();
        for (name, agent) in &self.agents {
            report.insert(name.clone(), agent.status().await);
        }
        report
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn agent_loop(
        name: String,
        agent: Arc<ManagedAgent>,
        running: Arc<AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        while running.load(Ordering::SeqCst) {
            agent.execute().await;

            // Interval is re-read every tick so feedback adjustments apply
            // on the next iteration.
            let pause = if agent.status().await.state.is_error() {
                ERROR_BACKOFF
            } else {
                Duration::from_secs(agent.interval_secs())
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Run loop for '{}' exited", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLogic;
    use async_trait::async_trait;
    use common::{AgentConfig, AgentState};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU64;
    use tokio::time::{sleep, Duration};

    struct Counting {
        runs: Arc<AtomicU64>,
    }

    #[async_trait]
    impl AgentLogic for Counting {
        async fn run(&self) -> Result<Value> {
            let count = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!(count))
        }
    }

    fn counting_agent(interval: u64) -> (Arc<ManagedAgent>, Arc<AtomicU64>) {
        let runs = Arc::new(AtomicU64::new(0));
        let agent = Arc::new(ManagedAgent::new(
            "counter",
            Box::new(Counting {
                runs: Arc::clone(&runs),
            }),
            AgentConfig::new(interval),
        ));
        (agent, runs)
    }

    #[tokio::test]
    async fn test_agents_tick_and_stop() {
        let (agent, runs) = counting_agent(1);
        let mut agents = HashMap::new();
        agents.insert("counter".to_string(), Arc::clone(&agent));

        let runner = IntervalRunner::new(agents);
        runner.start_all().await.unwrap();
        sleep(Duration::from_millis(100)).await;
        runner.stop_all().await;

        // The loop executes immediately on start, before the first sleep.
        assert!(runs.load(Ordering::SeqCst) >= 1);

        let report = runner.report().await;
        assert!(!report["counter"].active);
        assert_eq!(report["counter"].state, AgentState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_all_is_idempotent() {
        let (agent, _) = counting_agent(1);
        let mut agents = HashMap::new();
        agents.insert("counter".to_string(), agent);

        let runner = IntervalRunner::new(agents);
        runner.start_all().await.unwrap();
        assert!(runner.start_all().await.is_err());

        runner.stop_all().await;
        runner.stop_all().await;
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_interval_changes_apply_next_tick() {
        let (agent, _) = counting_agent(30);
        let mut agents = HashMap::new();
        agents.insert("counter".to_string(), Arc::clone(&agent));

        let runner = IntervalRunner::new(agents);
        runner.start_all().await.unwrap();

        // A feedback-style write lands on the shared agent; the loop reads
        // the new value when it computes its next pause.
        agent.set_interval_secs(1);
        assert_eq!(agent.interval_secs(), 1);

        runner.stop_all().await;
    }
}
