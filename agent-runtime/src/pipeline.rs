//! Execution pipeline: per-agent FIFO queues plus a static routing table,
//! turned into a running dataflow with one worker task per agent.
//!
//! Queues are mpsc channels, so producers (routing, external enqueues) run
//! concurrently against a single consumer and idle workers park on the channel
//! instead of busy-polling. Routes may form cycles; a task forwarded around a
//! cycle keeps circulating until the pipeline is stopped.

use crate::agent::ManagedAgent;
use anyhow::{bail, Result};
use common::CoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Side-channel invoked with an agent's result before routing.
pub type OutputHandler = dyn Fn(&Value) -> Result<()> + Send + Sync;

pub struct ExecutionPipeline {
    agents: RwLock<HashMap<String, Arc<ManagedAgent>>>,
    handlers: RwLock<HashMap<String, Arc<OutputHandler>>>,
    senders: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>>,
    receivers: Mutex<HashMap<String, mpsc::UnboundedReceiver<Value>>>,
    routes: Arc<RwLock<HashMap<String, Vec<String>>>>,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionPipeline {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            agents: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            senders: Arc::new(RwLock::new(HashMap::new())),
            receivers: Mutex::new(HashMap::new()),
            routes: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register an agent and create its empty queue. Must precede `start`.
    pub async fn register_agent(&self, name: &str, agent: Arc<ManagedAgent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.agents.write().await.insert(name.to_string(), agent);
        self.senders.write().await.insert(name.to_string(), tx);
        self.receivers.lock().await.insert(name.to_string(), rx);
        info!("Agent '{}' registered with pipeline", name);
    }

    /// Declare the fan-out for one agent's output, overwriting any existing
    /// route for that agent.
    pub async fn define_route(&self, from: &str, to: Vec<String>) {
        info!("Route added: {} -> {:?}", from, to);
        self.routes.write().await.insert(from.to_string(), to);
    }

    /// Register a side-channel for one agent's results (dashboard push,
    /// feedback scoring, alerting). Invoked before routing.
    pub async fn register_output_handler<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .await
            .insert(name.to_string(), Arc::new(handler));
        info!("Output handler registered for '{}'", name);
    }

    /// Append a task to an agent's queue. Tasks for unregistered agents are
    /// dropped with a warning; delivery is best effort by design.
    pub async fn enqueue_task(&self, name: &str, data: Value) {
        let senders = self.senders.read().await;
        match senders.get(name) {
            Some(tx) => {
                if tx.send(data).is_err() {
                    warn!("Queue for '{}' is closed, task dropped", name);
                }
            }
            None => warn!("Dropping task for unregistered agent '{}'", name),
        }
    }

    /// Spawn one worker per registered agent. Fails if the pipeline is already
    /// running or was stopped without a `reset`.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!(CoreError::AlreadyRunning("execution pipeline"));
        }
        self.shutdown.send_replace(false);

        let agents = self.agents.read().await.clone();
        let handlers = self.handlers.read().await.clone();
        let mut receivers = self.receivers.lock().await;
        let mut workers = self.workers.lock().await;

        for (name, agent) in agents {
            let Some(rx) = receivers.remove(&name) else {
                self.running.store(false, Ordering::SeqCst);
                bail!("queue for '{}' already consumed; reset the pipeline before restarting", name);
            };
            let handler = handlers.get(&name).cloned();
            workers.push(tokio::spawn(Self::worker_loop(
                name,
                agent,
                rx,
                handler,
                Arc::clone(&self.routes),
                Arc::clone(&self.senders),
                Arc::clone(&self.running),
                self.shutdown.subscribe(),
            )));
        }

        info!("Pipeline started with {} workers", workers.len());
        Ok(())
    }

    /// Signal all workers to exit after their current iteration and wait for
    /// them. Queues are not drained. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!("Pipeline stopped");
    }

    /// Clear all queues and routes between pipeline runs. The caller
    /// guarantees no worker is still draining.
    pub async fn reset(&self) {
        self.routes.write().await.clear();

        let names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        let mut senders = self.senders.write().await;
        let mut receivers = self.receivers.lock().await;
        senders.clear();
        receivers.clear();
        for name in names {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(name.clone(), tx);
            receivers.insert(name, rx);
        }
        info!("Pipeline reset complete");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn route_table(&self) -> HashMap<String, Vec<String>> {
        self.routes.read().await.clone()
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker_loop(
        name: String,
        agent: Arc<ManagedAgent>,
        mut rx: mpsc::UnboundedReceiver<Value>,
        handler: Option<Arc<OutputHandler>>,
        routes: Arc<RwLock<HashMap<String, Vec<String>>>>,
        senders: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>>,
        running: Arc<AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Worker started for '{}'", name);
        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                task = rx.recv() => match task {
                    Some(payload) => {
                        Self::process_task(&name, &agent, payload, &handler, &routes, &senders)
                            .await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Worker for '{}' exited", name);
    }

    /// One pipeline step: run the agent on the task, hand the result to the
    /// output handler, then fan it out to every downstream route target.
    /// Every failure here is contained; the worker keeps looping.
    async fn process_task(
        name: &str,
        agent: &Arc<ManagedAgent>,
        payload: Value,
        handler: &Option<Arc<OutputHandler>>,
        routes: &Arc<RwLock<HashMap<String, Vec<String>>>>,
        senders: &Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>>,
    ) {
        // execute_with_input falls back to a plain run for agents that do not
        // accept input; agent failures are already contained as Error state.
        // The invocation runs in its own task so a panicking agent cannot take
        // the worker down with it.
        let invocation = {
            let agent = Arc::clone(agent);
            tokio::spawn(async move { agent.execute_with_input(payload).await })
        };
        let result = match invocation.await {
            Ok(Some(result)) => result,
            Ok(None) => return,
            Err(e) => {
                warn!("Agent '{}' panicked during a pipeline step: {}", name, e);
                return;
            }
        };

        if let Some(handler) = handler {
            if let Err(e) = handler(&result) {
                warn!("Output handler for '{}' failed: {}", name, e);
            }
        }

        let routes = routes.read().await;
        let Some(targets) = routes.get(name) else {
            return;
        };
        let senders = senders.read().await;
        for dest in targets {
            match senders.get(dest) {
                Some(tx) => {
                    if tx.send(result.clone()).is_err() {
                        warn!("Route {} -> {} dropped, queue closed", name, dest);
                    }
                }
                None => warn!("Route {} -> {} dropped, target unregistered", name, dest),
            }
        }
    }
}

impl Default for ExecutionPipeline {
    fn default() -> Self {
        Self::new()
    }
}
