//! Factory registry: constructs managed agents by name from opaque config.

use crate::agent::{AgentLogic, ManagedAgent};
use anyhow::Result;
use common::{AgentConfig, CoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

type AgentCtor = Box<dyn Fn(AgentConfig) -> Result<Box<dyn AgentLogic>> + Send + Sync>;

/// Maps agent names to constructors. Registration happens once at startup;
/// `create` is used by whatever assembles the agent fleet from configuration.
pub struct AgentRegistry {
    factories: RwLock<HashMap<String, AgentCtor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a constructor under a unique name. A later registration for
    /// the same name replaces the earlier one.
    pub async fn register<F>(&self, name: &str, ctor: F)
    where
        F: Fn(AgentConfig) -> Result<Box<dyn AgentLogic>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .await
            .insert(name.to_string(), Box::new(ctor));
        info!("Registered agent factory '{}'", name);
    }

    /// Instantiate a managed agent. Unknown names fail fast with
    /// `CoreError::UnknownAgent`.
    pub async fn create(&self, name: &str, config: AgentConfig) -> Result<Arc<ManagedAgent>> {
        let factories = self.factories.read().await;
        let ctor = factories
            .get(name)
            .ok_or_else(|| CoreError::UnknownAgent(name.to_string()))?;
        let logic = ctor(config.clone())?;
        Ok(Arc::new(ManagedAgent::new(name, logic, config)))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Nop;

    #[async_trait]
    impl AgentLogic for Nop {
        async fn run(&self) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_create_registered_agent() {
        let registry = AgentRegistry::new();
        registry
            .register("watcher", |_config| Ok(Box::new(Nop) as Box<dyn AgentLogic>))
            .await;

        let agent = registry
            .create("watcher", AgentConfig::new(3))
            .await
            .unwrap();
        assert_eq!(agent.name(), "watcher");
        assert_eq!(agent.interval_secs(), 3);
    }

    #[tokio::test]
    async fn test_unknown_name_fails_fast() {
        let registry = AgentRegistry::new();
        let err = registry
            .create("missing", AgentConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CoreError>(),
            Some(&CoreError::UnknownAgent("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_factory_reads_config_params() {
        let registry = AgentRegistry::new();
        registry
            .register("configured", |config| {
                assert_eq!(config.param("source"), Some(&json!("governance")));
                Ok(Box::new(Nop) as Box<dyn AgentLogic>)
            })
            .await;

        let mut params = serde_json::Map::new();
        params.insert("source".to_string(), json!("governance"));
        params.insert("interval".to_string(), json!(9));

        let agent = registry
            .create("configured", AgentConfig::from_params(params))
            .await
            .unwrap();
        assert_eq!(agent.interval_secs(), 9);
        assert_eq!(registry.names().await, vec!["configured".to_string()]);
    }
}
