//! Tool registry: registration, lookup, and timeout-bounded execution.
//!
//! The registry is populated at startup and then shared read-only behind an
//! `Arc`; entries are immutable after registration. Executors come in two
//! shapes: blocking closures run on the blocking pool, future-returning
//! closures are awaited directly. The per-tool timeout applies to both.

mod catalog;
mod travel;

pub use catalog::{CityEntry, TravelCatalog};
pub use travel::build_travel_registry;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AgentError;

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Tool metadata: name, description, JSON-schema-shaped parameters.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// `{"type": "object", "properties": {...}}`
    pub parameters: Value,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}

fn default_category() -> String {
    "general".to_string()
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            required_params: Vec::new(),
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            category: "general".into(),
            tags: Vec::new(),
        }
    }

    pub fn required(mut self, params: &[&str]) -> Self {
        self.required_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

type SyncFn = dyn Fn(Map<String, Value>) -> Result<Value, AgentError> + Send + Sync;
type AsyncFn =
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, AgentError>> + Send + Sync;

/// Executor shape; see module docs for the dispatch rules.
#[derive(Clone)]
pub enum ToolExecutor {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl ToolExecutor {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        ToolExecutor::Sync(Arc::new(f))
    }

    pub fn asynchronous<F>(f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, AgentError>>
            + Send
            + Sync
            + 'static,
    {
        ToolExecutor::Async(Arc::new(f))
    }
}

struct RegisteredTool {
    info: ToolInfo,
    executor: ToolExecutor,
}

/// Name → tool map. Registration happens before the registry is shared, so
/// lookup and execution need no locking.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; returns false (and keeps the existing entry) when
    /// the name collides.
    pub fn register(&mut self, info: ToolInfo, executor: ToolExecutor) -> bool {
        if self.tools.contains_key(&info.name) {
            tracing::warn!(tool = %info.name, "工具已存在");
            return false;
        }
        tracing::debug!(tool = %info.name, "工具注册成功");
        self.tools
            .insert(info.name.clone(), RegisteredTool { info, executor });
        true
    }

    pub fn get(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.get(name).map(|t| &t.info)
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.tools.values().map(|t| t.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Executes a tool: required-parameter check, dispatch, per-tool timeout.
    /// Non-object results are wrapped as `{"result": <value>}`.
    pub async fn execute(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Map<String, Value>, AgentError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        for required in &tool.info.required_params {
            if !params.contains_key(required) {
                return Err(AgentError::MissingParameter(required.clone()));
            }
        }

        let timeout = Duration::from_secs(tool.info.timeout_secs);
        let result = match &tool.executor {
            ToolExecutor::Async(f) => tokio::time::timeout(timeout, f(params)).await,
            ToolExecutor::Sync(f) => {
                let f = Arc::clone(f);
                let handle = tokio::task::spawn_blocking(move || f(params));
                match tokio::time::timeout(timeout, handle).await {
                    Ok(joined) => Ok(joined
                        .map_err(|e| AgentError::ToolFailed(format!("executor panicked: {e}")))?),
                    Err(elapsed) => Err(elapsed),
                }
            }
        };

        let value = match result {
            Ok(r) => r?,
            Err(_) => {
                return Err(AgentError::ToolTimeout {
                    name: name.to_string(),
                    timeout_secs: tool.info.timeout_secs,
                })
            }
        };

        Ok(match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_info(name: &str) -> ToolInfo {
        ToolInfo::new(name, "echoes input", json!({"type": "object", "properties": {}}))
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn register_rejects_duplicate_names() {
        let mut reg = ToolRegistry::new();
        let exec = ToolExecutor::sync(|_| Ok(json!({"ok": true})));
        assert!(reg.register(echo_info("echo"), exec.clone()));
        assert!(!reg.register(echo_info("echo"), exec));
        assert_eq!(reg.list().len(), 1);
    }

    #[tokio::test]
    async fn execute_checks_required_params() {
        let mut reg = ToolRegistry::new();
        reg.register(
            echo_info("needs_city").required(&["city"]),
            ToolExecutor::sync(|p| Ok(json!({"city": p["city"]}))),
        );
        let err = reg.execute("needs_city", Map::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingParameter(p) if p == "city"));
        let out = reg
            .execute("needs_city", params(&[("city", json!("北京"))]))
            .await
            .unwrap();
        assert_eq!(out["city"], "北京");
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let reg = ToolRegistry::new();
        assert!(matches!(
            reg.execute("nope", Map::new()).await,
            Err(AgentError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn non_object_results_are_wrapped() {
        let mut reg = ToolRegistry::new();
        reg.register(
            echo_info("scalar"),
            ToolExecutor::sync(|_| Ok(json!(42))),
        );
        let out = reg.execute("scalar", Map::new()).await.unwrap();
        assert_eq!(out["result"], 42);
    }

    #[tokio::test]
    async fn async_executor_is_awaited() {
        let mut reg = ToolRegistry::new();
        reg.register(
            echo_info("later"),
            ToolExecutor::asynchronous(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(json!({"done": true}))
                })
            }),
        );
        let out = reg.execute("later", Map::new()).await.unwrap();
        assert_eq!(out["done"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_async_executor_times_out_at_configured_bound() {
        let mut reg = ToolRegistry::new();
        reg.register(
            echo_info("sleep_tool").timeout_secs(1),
            ToolExecutor::asynchronous(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!({"never": true}))
                })
            }),
        );
        let err = reg.execute("sleep_tool", Map::new()).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::ToolTimeout { timeout_secs: 1, .. }
        ));
    }

    #[tokio::test]
    async fn executor_error_propagates() {
        let mut reg = ToolRegistry::new();
        reg.register(
            echo_info("broken"),
            ToolExecutor::sync(|_| Err(AgentError::ToolFailed("boom".into()))),
        );
        assert!(matches!(
            reg.execute("broken", Map::new()).await,
            Err(AgentError::ToolFailed(m)) if m == "boom"
        ));
    }
}
