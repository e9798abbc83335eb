//! In-process session store: opaque ids mapped to metadata, memory, and a
//! lazily-built orchestrator.
//!
//! Metadata lives under a short `RwLock` so list/read paths never wait on a
//! running stream. The orchestrator sits behind an async mutex: concurrent
//! streaming requests on one session serialize on it, and a model change
//! rebuilds the orchestrator at the next checkout while in-flight runs
//! complete under the previous model. A reaper scans on list/create and
//! evicts sessions idle past the configured timeout.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use env_config::{AgentSection, AppConfig, ModelConfig};

use crate::error::AgentError;
use crate::orchestrator::Orchestrator;

/// Builds an orchestrator for a resolved model. Replaceable so serving
/// layers can inject a scripted LLM in tests.
pub type OrchestratorFactory =
    dyn Fn(&str, &ModelConfig, &AgentSection) -> Orchestrator + Send + Sync;

#[derive(Clone, Debug)]
struct SessionMeta {
    name: Option<String>,
    model_id: String,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    message_count: u64,
}

/// Client-facing session row.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: Option<String>,
    pub message_count: u64,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub model_id: String,
}

pub struct SessionEntry {
    pub id: String,
    meta: RwLock<SessionMeta>,
    orchestrator: Arc<Mutex<Option<Orchestrator>>>,
}

impl SessionEntry {
    fn new(id: String, model_id: String, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            meta: RwLock::new(SessionMeta {
                name,
                model_id,
                created_at: now,
                last_active: now,
                message_count: 0,
            }),
            orchestrator: Arc::new(Mutex::new(None)),
        }
    }

    fn meta_read(&self) -> SessionMeta {
        self.meta.read().expect("session meta lock").clone()
    }

    pub fn touch(&self) {
        self.meta.write().expect("session meta lock").last_active = Utc::now();
    }

    pub fn record_message(&self) {
        let mut meta = self.meta.write().expect("session meta lock");
        meta.message_count += 1;
        meta.last_active = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        let meta = self.meta_read();
        SessionSummary {
            session_id: self.id.clone(),
            name: meta.name,
            message_count: meta.message_count,
            last_active: meta.last_active,
            created_at: meta.created_at,
            model_id: meta.model_id,
        }
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionEntry>>,
    config: Arc<AppConfig>,
    factory: Box<OrchestratorFactory>,
}

impl SessionStore {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self::with_factory(
            config,
            Box::new(|id, model, agent| Orchestrator::new(id, model, agent)),
        )
    }

    pub fn with_factory(config: Arc<AppConfig>, factory: Box<OrchestratorFactory>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            factory,
        }
    }

    fn default_model(&self) -> String {
        self.config.default_model.clone()
    }

    /// Creates a session with a fresh opaque id.
    pub fn create(&self, name: Option<String>) -> SessionSummary {
        self.reap();
        let id = Uuid::new_v4().to_string();
        let entry = Arc::new(SessionEntry::new(id.clone(), self.default_model(), name));
        let summary = entry.summary();
        self.sessions.insert(id, entry);
        summary
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Returns the session, creating it under the given id when absent
    /// (first request carrying a fresh gateway-issued id).
    pub fn get_or_create(&self, id: &str) -> Arc<SessionEntry> {
        if let Some(entry) = self.get(id) {
            return entry;
        }
        let entry = Arc::new(SessionEntry::new(
            id.to_string(),
            self.default_model(),
            None,
        ));
        self.sessions
            .entry(id.to_string())
            .or_insert(entry)
            .value()
            .clone()
    }

    pub fn list(&self, include_empty: bool) -> Vec<SessionSummary> {
        self.reap();
        let mut rows: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|e| e.value().summary())
            .filter(|s| include_empty || s.message_count > 0)
            .collect();
        rows.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        rows
    }

    pub fn delete(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn set_name(&self, id: &str, name: String) -> Result<String, AgentError> {
        let entry = self
            .get(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        let mut meta = entry.meta.write().expect("session meta lock");
        meta.name = Some(name.clone());
        meta.last_active = Utc::now();
        Ok(name)
    }

    /// Updates the session's model selection. In-flight streams finish under
    /// the previous model; the next checkout rebuilds.
    pub fn set_model(&self, id: &str, model_id: String) -> Result<String, AgentError> {
        if self.config.model(&model_id).is_none() {
            return Err(AgentError::UnknownModel(model_id));
        }
        let entry = self
            .get(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        let mut meta = entry.meta.write().expect("session meta lock");
        meta.model_id = model_id.clone();
        meta.last_active = Utc::now();
        Ok(model_id)
    }

    pub fn get_model(&self, id: &str) -> Result<String, AgentError> {
        let entry = self
            .get(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        let model = entry.meta_read().model_id;
        Ok(if model.is_empty() {
            self.default_model()
        } else {
            model
        })
    }

    /// Clears the session's conversation memory and resets its counter.
    pub async fn clear_messages(&self, id: &str) -> Result<(), AgentError> {
        let entry = self
            .get(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        {
            let mut guard = entry.orchestrator.lock().await;
            if let Some(orchestrator) = guard.as_mut() {
                orchestrator.clear_conversation();
            }
        }
        let mut meta = entry.meta.write().expect("session meta lock");
        meta.message_count = 0;
        meta.last_active = Utc::now();
        Ok(())
    }

    pub fn touch(&self, id: &str) -> Result<(), AgentError> {
        self.get(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?
            .touch();
        Ok(())
    }

    /// Locks the session's orchestrator for one run, building or rebuilding
    /// it when absent or when the effective model changed. The guard holds
    /// the per-session serialization for the run's whole lifetime.
    pub async fn checkout(
        &self,
        session_id: &str,
        model_id: &str,
    ) -> Result<(Arc<SessionEntry>, OwnedMutexGuard<Option<Orchestrator>>), AgentError> {
        let entry = self.get_or_create(session_id);

        let requested = if model_id.is_empty() {
            entry.meta_read().model_id
        } else {
            model_id.to_string()
        };
        let (resolved_id, model_cfg) = self.config.model_or_default(&requested)?;

        let mut guard = Arc::clone(&entry.orchestrator).lock_owned().await;
        let rebuild = guard
            .as_ref()
            .map(|o| o.model_id() != resolved_id)
            .unwrap_or(true);
        if rebuild {
            tracing::info!(session = %session_id, model = %resolved_id, "构建会话编排器");
            *guard = Some((self.factory)(&resolved_id, model_cfg, &self.config.agent));
        }

        entry.record_message();
        Ok((entry, guard))
    }

    /// Evicts sessions idle past the configured timeout.
    fn reap(&self) {
        let idle = ChronoDuration::seconds(self.config.agent.session_idle_secs as i64);
        let cutoff = Utc::now() - idle;
        self.sessions
            .retain(|_, entry| entry.meta_read().last_active >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use env_config::AppConfig;

    fn config(idle_secs: u64) -> Arc<AppConfig> {
        let yaml = format!(
            r#"
default_model: mock-a
models:
  mock-a: {{provider: openai, model: gpt-4o-mini, api_key: sk-a}}
  mock-b: {{provider: openai, model: gpt-4o, api_key: sk-b}}
agent:
  session_idle_secs: {idle_secs}
"#
        );
        Arc::new(AppConfig::from_str(&yaml, true).unwrap())
    }

    #[test]
    fn create_list_delete_round_trip() {
        let store = SessionStore::new(config(86_400));
        let created = store.create(Some("北京游".into()));
        assert!(!created.session_id.is_empty());
        assert_eq!(created.model_id, "mock-a");

        // Empty sessions are hidden unless asked for.
        assert!(store.list(false).is_empty());
        assert_eq!(store.list(true).len(), 1);

        assert!(store.delete(&created.session_id));
        assert!(!store.delete(&created.session_id));
    }

    #[test]
    fn name_and_model_updates() {
        let store = SessionStore::new(config(86_400));
        let id = store.create(None).session_id;

        store.set_name(&id, "新名字".into()).unwrap();
        assert_eq!(store.get(&id).unwrap().summary().name.as_deref(), Some("新名字"));

        store.set_model(&id, "mock-b".into()).unwrap();
        assert_eq!(store.get_model(&id).unwrap(), "mock-b");

        assert!(matches!(
            store.set_model(&id, "unknown".into()),
            Err(AgentError::UnknownModel(_))
        ));
        assert!(matches!(
            store.set_name("missing", "x".into()),
            Err(AgentError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn checkout_builds_and_rebuilds_on_model_change() {
        let store = SessionStore::new(config(86_400));
        let id = store.create(None).session_id;

        let (_, guard) = store.checkout(&id, "").await.unwrap();
        assert_eq!(guard.as_ref().unwrap().model_id(), "mock-a");
        drop(guard);

        // Request-level override wins and rebuilds.
        let (_, guard) = store.checkout(&id, "mock-b").await.unwrap();
        assert_eq!(guard.as_ref().unwrap().model_id(), "mock-b");
        drop(guard);

        assert!(store.checkout(&id, "unknown").await.is_err());
    }

    #[tokio::test]
    async fn checkout_counts_messages() {
        let store = SessionStore::new(config(86_400));
        let id = store.create(None).session_id;
        let (entry, guard) = store.checkout(&id, "").await.unwrap();
        drop(guard);
        assert_eq!(entry.summary().message_count, 1);
        assert_eq!(store.list(false).len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_id_is_created_on_checkout() {
        let store = SessionStore::new(config(86_400));
        let (entry, guard) = store.checkout("fresh-id", "").await.unwrap();
        drop(guard);
        assert_eq!(entry.id, "fresh-id");
        assert!(store.get("fresh-id").is_some());
    }

    #[test]
    fn reaper_evicts_idle_sessions() {
        let store = SessionStore::new(config(0));
        let id = store.create(None).session_id;
        std::thread::sleep(std::time::Duration::from_millis(20));
        // idle timeout of zero: the next list reaps it.
        assert!(store.list(true).is_empty());
        assert!(store.get(&id).is_none());
    }
}
