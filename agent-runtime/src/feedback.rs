//! Feedback loop: closed-loop interval tuning from scored agent outputs.
//!
//! Scores live in a rolling per-agent history; once five scores exist, each
//! new score recomputes the trailing-five average and nudges the agent's run
//! interval: poor agents are slowed down, strong agents sped up. The adjusted
//! interval is written onto the live agent (all drivers read it on their next
//! tick) and checkpointed durably.

use crate::agent::ManagedAgent;
use crate::storage::Persistence;
use anyhow::Result;
use common::{CoreError, MAX_INTERVAL_SECS, MIN_INTERVAL_SECS};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Number of trailing scores that drive an interval adjustment.
pub const FEEDBACK_WINDOW: usize = 5;

/// Below this trailing average the agent is slowed down.
const LOW_SCORE_THRESHOLD: f64 = 0.5;
/// Above this trailing average the agent is sped up.
const HIGH_SCORE_THRESHOLD: f64 = 0.8;

/// Injected scoring function: maps an agent's output to a quality score.
/// Results are clamped into `[0, 1]`.
pub type ScoringFn = Box<dyn Fn(&str, &Value) -> f64 + Send + Sync>;

pub struct FeedbackLoop {
    agents: HashMap<String, Arc<ManagedAgent>>,
    scorer: ScoringFn,
    persistence: Arc<dyn Persistence>,
    history: RwLock<HashMap<String, Vec<f64>>>,
}

impl FeedbackLoop {
    pub fn new(
        agents: HashMap<String, Arc<ManagedAgent>>,
        scorer: ScoringFn,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            agents,
            scorer,
            persistence,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Score an agent output, record it, and adjust the agent's interval once
    /// enough history exists. Unknown agent names fail fast.
    pub async fn evaluate_output(&self, agent_name: &str, output: &Value) -> Result<()> {
        self.agent(agent_name)?;
        let score = (self.scorer)(agent_name, output).clamp(0.0, 1.0);
        debug!("Scored output from '{}': {:.2}", agent_name, score);
        self.record_score(
            agent_name,
            score,
            json!({"feedback_score": score, "output": output}),
        )
        .await
    }

    /// Inject a score from outside the output-evaluation path (admin,
    /// dashboard). Same history, same policy.
    pub async fn manual_feedback(&self, agent_name: &str, score: f64) -> Result<()> {
        self.agent(agent_name)?;
        let score = score.clamp(0.0, 1.0);
        info!("Manual feedback for '{}': {:.2}", agent_name, score);
        self.record_score(agent_name, score, json!({"feedback_score": score}))
            .await
    }

    /// Rehydrate score histories from persisted log entries. Called once at
    /// startup, before any new scores arrive.
    pub async fn restore_feedback_state(&self) -> Result<()> {
        let mut history = self.history.write().await;
        for name in self.agents.keys() {
            let entries = self.persistence.log_history(name).await?;
            let scores = history.entry(name.clone()).or_default();
            for entry in entries {
                if let Some(score) = entry.event.get("feedback_score").and_then(Value::as_f64) {
                    scores.push(score);
                }
            }
            if !scores.is_empty() {
                info!("Restored {} feedback scores for '{}'", scores.len(), name);
            }
        }
        Ok(())
    }

    /// Recorded scores for one agent, oldest first.
    pub async fn scores(&self, agent_name: &str) -> Vec<f64> {
        self.history
            .read()
            .await
            .get(agent_name)
            .cloned()
            .unwrap_or_default()
    }

    async fn record_score(&self, agent_name: &str, score: f64, log_event: Value) -> Result<()> {
        let recorded = {
            let mut history = self.history.write().await;
            let scores = history.entry(agent_name.to_string()).or_default();
            scores.push(score);
            scores.len()
        };

        self.persistence.append_log(agent_name, log_event).await?;

        if recorded >= FEEDBACK_WINDOW {
            self.adjust_policy(agent_name).await?;
        }
        Ok(())
    }

    /// Apply the control policy over the trailing window and push the result
    /// onto the live agent.
    async fn adjust_policy(&self, agent_name: &str) -> Result<()> {
        let average = {
            let history = self.history.read().await;
            let scores = match history.get(agent_name) {
                Some(scores) => scores,
                None => return Ok(()),
            };
            let window = &scores[scores.len() - FEEDBACK_WINDOW..];
            window.iter().sum::<f64>() / window.len() as f64
        };

        let agent = self.agent(agent_name)?;
        let current = agent.interval_secs();
        let adjusted = if average < LOW_SCORE_THRESHOLD {
            (current + 1).min(MAX_INTERVAL_SECS)
        } else if average > HIGH_SCORE_THRESHOLD {
            current.saturating_sub(1).max(MIN_INTERVAL_SECS)
        } else {
            current
        };

        if adjusted != current {
            agent.set_interval_secs(adjusted);
            info!(
                "Adjusted interval for '{}': {}s -> {}s (avg score {:.2})",
                agent_name, current, adjusted, average
            );
        } else {
            debug!(
                "Interval for '{}' unchanged at {}s (avg score {:.2})",
                agent_name, current, average
            );
        }

        self.persistence
            .checkpoint(agent_name, &json!({"interval_secs": adjusted}))
            .await?;
        Ok(())
    }

    fn agent(&self, agent_name: &str) -> Result<&Arc<ManagedAgent>> {
        self.agents
            .get(agent_name)
            .ok_or_else(|| CoreError::UnknownAgent(agent_name.to_string()).into())
    }
}
