// Persistence Collaborator Interface
// Durable, best-effort key-value and append-log storage for agent state,
// feedback scores and restart records. No transactional guarantees.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One append-log record. The wrapping timestamp is assigned at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub recorded_at: DateTime<Utc>,
    pub event: Value,
}

/// Trait for persistence backends. `scope` is typically an agent name.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Save data under a scope and key, replacing any previous value.
    async fn save(&self, scope: &str, key: &str, data: &Value) -> Result<()>;

    /// Load data for a scope and key, `None` if absent.
    async fn load(&self, scope: &str, key: &str) -> Result<Option<Value>>;

    /// Append a timestamped entry to the scope's event log.
    async fn append_log(&self, scope: &str, event: Value) -> Result<()>;

    /// The scope's full event log, oldest first.
    async fn log_history(&self, scope: &str) -> Result<Vec<LogEntry>>;

    /// Delete everything stored for a scope.
    async fn clear(&self, scope: &str) -> Result<()>;

    /// Save a scope's checkpoint state.
    async fn checkpoint(&self, scope: &str, state: &Value) -> Result<()> {
        self.save(scope, "checkpoint", state).await
    }

    /// Load a scope's checkpoint state, `None` if never checkpointed.
    async fn restore(&self, scope: &str) -> Result<Option<Value>> {
        self.load(scope, "checkpoint").await
    }
}

/// In-memory store (for testing and development).
pub struct MemoryStore {
    values: tokio::sync::RwLock<HashMap<(String, String), Value>>,
    logs: tokio::sync::RwLock<HashMap<String, Vec<LogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: tokio::sync::RwLock::new(HashMap::new()),
            logs: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryStore {
    async fn save(&self, scope: &str, key: &str, data: &Value) -> Result<()> {
        let mut values = self.values.write().await;
        values.insert((scope.to_string(), key.to_string()), data.clone());
        Ok(())
    }

    async fn load(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().await;
        Ok(values.get(&(scope.to_string(), key.to_string())).cloned())
    }

    async fn append_log(&self, scope: &str, event: Value) -> Result<()> {
        let mut logs = self.logs.write().await;
        logs.entry(scope.to_string()).or_default().push(LogEntry {
            recorded_at: Utc::now(),
            event,
        });
        Ok(())
    }

    async fn log_history(&self, scope: &str) -> Result<Vec<LogEntry>> {
        let logs = self.logs.read().await;
        Ok(logs.get(scope).cloned().unwrap_or_default())
    }

    async fn clear(&self, scope: &str) -> Result<()> {
        self.values
            .write()
            .await
            .retain(|(s, _), _| s.as_str() != scope);
        self.logs.write().await.remove(scope);
        Ok(())
    }
}

/// JSON-file store: one directory per scope, one pretty-printed JSON file per
/// key, the event log as a single JSON array.
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        debug!("JSON file store rooted at {}", base_path.display());
        Self { base_path }
    }

    async fn file_path(&self, scope: &str, key: &str) -> Result<PathBuf> {
        let scope_dir = self.base_path.join(scope);
        tokio::fs::create_dir_all(&scope_dir)
            .await
            .with_context(|| format!("creating storage directory for '{}'", scope))?;
        Ok(scope_dir.join(format!("{}.json", key)))
    }

    async fn read_json(path: &Path) -> Result<Option<Value>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[async_trait::async_trait]
impl Persistence for JsonFileStore {
    async fn save(&self, scope: &str, key: &str, data: &Value) -> Result<()> {
        let path = self.file_path(scope, key).await?;
        let bytes = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!("Saved '{}' for scope '{}'", key, scope);
        Ok(())
    }

    async fn load(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        let path = self.base_path.join(scope).join(format!("{}.json", key));
        Self::read_json(&path).await
    }

    async fn append_log(&self, scope: &str, event: Value) -> Result<()> {
        let path = self.file_path(scope, "log").await?;
        let mut entries: Vec<LogEntry> = match Self::read_json(&path).await? {
            Some(value) => serde_json::from_value(value)
                .with_context(|| format!("parsing log for '{}'", scope))?,
            None => Vec::new(),
        };
        entries.push(LogEntry {
            recorded_at: Utc::now(),
            event,
        });
        let bytes = serde_json::to_vec_pretty(&entries)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing log for '{}'", scope))?;
        Ok(())
    }

    async fn log_history(&self, scope: &str) -> Result<Vec<LogEntry>> {
        let path = self.base_path.join(scope).join("log.json");
        match Self::read_json(&path).await? {
            Some(value) => serde_json::from_value(value)
                .with_context(|| format!("parsing log for '{}'", scope)),
            None => Ok(Vec::new()),
        }
    }

    async fn clear(&self, scope: &str) -> Result<()> {
        let scope_dir = self.base_path.join(scope);
        match tokio::fs::remove_dir_all(&scope_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("clearing scope '{}'", scope)),
        }
    }
}
