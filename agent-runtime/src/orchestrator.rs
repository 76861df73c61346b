//! Orchestration engine: runs agents in ordered schedule groups on a
//! repeating cycle.
//!
//! Groups execute strictly in list order; agents within a group run
//! concurrently and are barrier-joined before the next group starts. A short
//! fixed pause separates groups, and a configurable sleep separates cycles.
//! Schedule updates take effect at the next cycle boundary, never mid-group.

use crate::agent::ManagedAgent;
use anyhow::{bail, Result};
use common::CoreError;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Ordered execution groups by agent name.
pub type Schedule = Vec<Vec<String>>;

/// Pause inserted between schedule groups to decouple bursts.
const GROUP_PAUSE: Duration = Duration::from_millis(500);
/// Default sleep after a full cycle.
const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 10;

pub struct OrchestrationEngine {
    agents: HashMap<String, Arc<ManagedAgent>>,
    schedule: Arc<RwLock<Schedule>>,
    cycle_interval_secs: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestrationEngine {
    pub fn new(agents: HashMap<String, Arc<ManagedAgent>>, schedule: Schedule) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            agents,
            schedule: Arc::new(RwLock::new(schedule)),
            cycle_interval_secs: Arc::new(AtomicU64::new(DEFAULT_CYCLE_INTERVAL_SECS)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            loop_handle: Mutex::new(None),
        }
    }

    /// Start the cycle loop in a background task.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!(CoreError::AlreadyRunning("orchestration engine"));
        }
        self.shutdown.send_replace(false);
        info!("Starting orchestration");

        let handle = tokio::spawn(Self::run_loop(
            self.agents.clone(),
            Arc::clone(&self.schedule),
            Arc::clone(&self.cycle_interval_secs),
            Arc::clone(&self.running),
            self.shutdown.subscribe(),
        ));
        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the loop at the next group boundary and wait for it to exit.
    /// An in-flight group still completes its barrier join. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        info!("Orchestration stopped");
    }

    /// Replace the schedule. The running loop snapshots the schedule at each
    /// cycle boundary, so the new one applies from the next cycle.
    pub async fn update_schedule(&self, new_schedule: Schedule) {
        info!("Schedule updated to {:?}", new_schedule);
        *self.schedule.write().await = new_schedule;
    }

    /// Set the sleep between full cycles, in seconds.
    pub fn set_cycle_interval(&self, secs: u64) {
        info!("Cycle interval set to {}s", secs);
        self.cycle_interval_secs.store(secs, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(
        agents: HashMap<String, Arc<ManagedAgent>>,
        schedule: Arc<RwLock<Schedule>>,
        cycle_interval_secs: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        while running.load(Ordering::SeqCst) {
            let current_schedule = schedule.read().await.clone();
            debug!("Beginning execution cycle ({} groups)", current_schedule.len());

            for (index, group) in current_schedule.iter().enumerate() {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                debug!("Executing group {}: {:?}", index + 1, group);
                Self::execute_group(&agents, index, group).await;

                if !Self::sleep_or_shutdown(GROUP_PAUSE, &mut shutdown).await {
                    return;
                }
            }

            debug!("Cycle complete, sleeping");
            let interval = Duration::from_secs(cycle_interval_secs.load(Ordering::SeqCst));
            if !Self::sleep_or_shutdown(interval, &mut shutdown).await {
                return;
            }
        }
    }

    /// Run every active agent in the group concurrently and barrier-join.
    /// A panicked agent task is logged and never aborts the join for its
    /// siblings; agent-level failures are already contained as Error state.
    async fn execute_group(
        agents: &HashMap<String, Arc<ManagedAgent>>,
        index: usize,
        group: &[String],
    ) {
        let mut handles = Vec::new();
        for name in group {
            match agents.get(name) {
                Some(agent) if agent.is_active() => {
                    let agent = Arc::clone(agent);
                    let name = name.clone();
                    handles.push(tokio::spawn(async move {
                        debug!("Running agent '{}'", name);
                        agent.execute().await;
                    }));
                }
                Some(_) => debug!("Skipping inactive agent '{}'", name),
                None => warn!("Schedule references unknown agent '{}'", name),
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Agent task in group {} aborted: {}", index + 1, e);
            }
        }
    }

    /// Returns false when shutdown was requested during the sleep.
    async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            changed = shutdown.changed() => match changed {
                Ok(()) => !*shutdown.borrow(),
                Err(_) => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLogic;
    use async_trait::async_trait;
    use common::AgentConfig;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Duration};

    /// Appends start/finish markers to a shared trace.
    struct Traced {
        tag: &'static str,
        trace: Arc<StdMutex<Vec<String>>>,
        work: Duration,
    }

    #[async_trait]
    impl AgentLogic for Traced {
        async fn run(&self) -> Result<Value> {
            self.trace.lock().unwrap().push(format!("{}:start", self.tag));
            sleep(self.work).await;
            self.trace.lock().unwrap().push(format!("{}:done", self.tag));
            Ok(Value::Null)
        }
    }

    fn traced_agent(
        tag: &'static str,
        trace: &Arc<StdMutex<Vec<String>>>,
        work: Duration,
    ) -> Arc<ManagedAgent> {
        Arc::new(ManagedAgent::new(
            tag,
            Box::new(Traced {
                tag,
                trace: Arc::clone(trace),
                work,
            }),
            AgentConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_group_barrier_orders_execution() {
        let trace = Arc::new(StdMutex::new(Vec::new()));
        let mut agents = HashMap::new();
        agents.insert(
            "x".to_string(),
            traced_agent("x", &trace, Duration::from_millis(80)),
        );
        agents.insert(
            "y".to_string(),
            traced_agent("y", &trace, Duration::from_millis(40)),
        );
        agents.insert(
            "z".to_string(),
            traced_agent("z", &trace, Duration::from_millis(1)),
        );

        let schedule = vec![
            vec!["x".to_string(), "y".to_string()],
            vec!["z".to_string()],
        ];
        let engine = OrchestrationEngine::new(agents, schedule);
        engine.set_cycle_interval(30);
        engine.start().await.unwrap();

        // One full first group (80ms work) + group pause, then z runs.
        sleep(Duration::from_millis(800)).await;
        engine.stop().await;

        let trace = trace.lock().unwrap();
        let position = |marker: &str| trace.iter().position(|m| m == marker).unwrap();
        assert!(position("x:done") < position("z:start"));
        assert!(position("y:done") < position("z:start"));
    }

    #[tokio::test]
    async fn test_inactive_agents_skipped_at_dispatch() {
        let trace = Arc::new(StdMutex::new(Vec::new()));
        let active = traced_agent("a", &trace, Duration::from_millis(1));
        let halted = traced_agent("b", &trace, Duration::from_millis(1));
        halted.stop().await;

        let mut agents = HashMap::new();
        agents.insert("a".to_string(), Arc::clone(&active));
        agents.insert("b".to_string(), halted);

        let engine =
            OrchestrationEngine::new(agents, vec![vec!["a".to_string(), "b".to_string()]]);
        engine.set_cycle_interval(30);
        engine.start().await.unwrap();
        sleep(Duration::from_millis(300)).await;
        engine.stop().await;

        let trace = trace.lock().unwrap();
        assert!(trace.iter().any(|m| m.starts_with("a:")));
        assert!(!trace.iter().any(|m| m.starts_with("b:")));
    }

    #[tokio::test]
    async fn test_stop_idempotent_and_restartable() {
        let engine = OrchestrationEngine::new(HashMap::new(), vec![]);
        engine.start().await.unwrap();
        assert!(engine.start().await.is_err());

        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_running());

        engine.start().await.unwrap();
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_schedule_swap_applies_next_cycle() {
        let trace = Arc::new(StdMutex::new(Vec::new()));
        let mut agents = HashMap::new();
        agents.insert(
            "a".to_string(),
            traced_agent("a", &trace, Duration::from_millis(1)),
        );
        agents.insert(
            "b".to_string(),
            traced_agent("b", &trace, Duration::from_millis(1)),
        );

        let engine = OrchestrationEngine::new(agents, vec![vec!["a".to_string()]]);
        engine.set_cycle_interval(1);
        engine.start().await.unwrap();
        sleep(Duration::from_millis(200)).await;

        engine.update_schedule(vec![vec!["b".to_string()]]).await;
        // Old cycle ends (1s sleep) and the next one picks up the new schedule.
        sleep(Duration::from_millis(1800)).await;
        engine.stop().await;

        let trace = trace.lock().unwrap();
        assert!(trace.iter().any(|m| m.starts_with("a:")));
        assert!(trace.iter().any(|m| m.starts_with("b:")));
    }
}
