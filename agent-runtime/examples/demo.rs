//! Example usage of the Agent Coordination Runtime
//!
//! This example demonstrates:
//! 1. Building agents from the factory registry
//! 2. Wiring a collector -> analyzer -> publisher dataflow in the pipeline
//! 3. Publishing domain events to the bus
//! 4. Supervising the fleet and tuning intervals from feedback

use agent_runtime::{
    AgentConfig, AgentLogic, AgentRegistry, EventBus, EventType, ExecutionPipeline, FeedbackLoop,
    MemoryStore, Persistence, Supervisor,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, Level};

/// Pretends to poll an external source.
struct Collector;

#[async_trait]
impl AgentLogic for Collector {
    async fn run(&self) -> Result<Value> {
        Ok(json!({"proposals_seen": 3, "votes_seen": 17}))
    }
}

/// Scores whatever the collector hands it.
struct Analyzer;

#[async_trait]
impl AgentLogic for Analyzer {
    async fn run(&self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn accepts_input(&self) -> bool {
        true
    }

    async fn run_with_input(&self, input: Value) -> Result<Value> {
        let votes = input["votes_seen"].as_u64().unwrap_or(0);
        Ok(json!({"quality": (votes as f64 / 20.0).min(1.0), "input": input}))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    // Shared infrastructure, constructed once and handed around.
    let bus = Arc::new(EventBus::new());
    let store: Arc<dyn Persistence> = Arc::new(MemoryStore::new());

    bus.subscribe(EventType::AlertTriggered, |event| {
        info!("Alert observed: {}", event.payload);
        Ok(())
    })
    .await;

    // Build the fleet from the registry.
    let registry = AgentRegistry::new();
    registry
        .register("collector", |_config| {
            Ok(Box::new(Collector) as Box<dyn AgentLogic>)
        })
        .await;
    registry
        .register("analyzer", |_config| {
            Ok(Box::new(Analyzer) as Box<dyn AgentLogic>)
        })
        .await;

    let collector = registry.create("collector", AgentConfig::new(2)).await?;
    let analyzer = registry.create("analyzer", AgentConfig::new(2)).await?;

    let mut agents = HashMap::new();
    agents.insert("collector".to_string(), Arc::clone(&collector));
    agents.insert("analyzer".to_string(), Arc::clone(&analyzer));

    // Feedback loop scores analyzer outputs by their self-reported quality.
    let feedback = Arc::new(FeedbackLoop::new(
        agents.clone(),
        Box::new(|_name, output| output["quality"].as_f64().unwrap_or(0.0)),
        Arc::clone(&store),
    ));
    feedback.restore_feedback_state().await?;

    // Pipeline: collector feeds the analyzer; analyzer results are scored.
    let pipeline = ExecutionPipeline::new();
    pipeline.register_agent("collector", Arc::clone(&collector)).await;
    pipeline.register_agent("analyzer", Arc::clone(&analyzer)).await;
    pipeline
        .define_route("collector", vec!["analyzer".to_string()])
        .await;
    {
        let feedback = Arc::clone(&feedback);
        pipeline
            .register_output_handler("analyzer", move |result| {
                let feedback = Arc::clone(&feedback);
                let result = result.clone();
                tokio::spawn(async move {
                    if let Err(e) = feedback.evaluate_output("analyzer", &result).await {
                        info!("Scoring failed: {}", e);
                    }
                });
                Ok(())
            })
            .await;
    }

    // Supervisor watches the same fleet independently of the driver.
    let supervisor =
        Supervisor::new(agents.clone(), Duration::from_secs(2)).with_persistence(Arc::clone(&store));
    supervisor.start().await?;

    pipeline.start().await?;
    pipeline.enqueue_task("collector", json!({"kick": true})).await;

    sleep(Duration::from_secs(3)).await;

    bus.emit(
        EventType::AlertTriggered,
        json!({"kind": "demo", "message": "cycle finished"}),
    )
    .await;

    for (name, snapshot) in supervisor.get_report() {
        info!(
            "{}: active={} state={} interval={}s",
            name, snapshot.active, snapshot.state, snapshot.interval_secs
        );
    }
    info!("Analyzer scores so far: {:?}", feedback.scores("analyzer").await);

    pipeline.stop().await;
    supervisor.stop().await;
    Ok(())
}
