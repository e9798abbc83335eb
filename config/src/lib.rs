//! Configuration for both tiers, loaded from one YAML or JSON file.
//!
//! `${VAR}` substrings anywhere in the file are replaced from the process
//! environment at load time; placeholders whose variable is unset are kept
//! verbatim so the model-visibility filter can detect them. A model whose
//! `api_key` is unresolved or still contains a `YOUR_` template marker is
//! hidden from the public model list but stays addressable by id (so a
//! misconfigured key fails at the LLM call with a useful error, not earlier).

mod interpolate;
mod model;

pub use interpolate::interpolate_env;
pub use model::{ModelConfig, ModelSummary};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("parse json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("no models configured")]
    NoModels,
}

/// Top-level configuration file shape.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model id used when a request carries no `model_id`.
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub web: WebSection,
    /// Agent endpoint the gateway dials. Key kept as `grpc` for config-file
    /// compatibility even though the transport is a WebSocket.
    #[serde(default, rename = "grpc")]
    pub rpc: RpcSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_working_memory")]
    pub max_working_memory: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rpc_port")]
    pub port: u16,
}

fn default_working_memory() -> usize {
    10
}
fn default_max_steps() -> usize {
    10
}
fn default_session_idle_secs() -> u64 {
    86_400
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_web_port() -> u16 {
    8000
}
fn default_rpc_port() -> u16 {
    50051
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_working_memory: default_working_memory(),
            max_steps: default_max_steps(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_web_port(),
            debug: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_rpc_port(),
        }
    }
}

impl AppConfig {
    /// Loads a config file, picking the parser from the extension
    /// (`.yaml`/`.yml` vs anything else = JSON) after `${VAR}` interpolation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        Self::from_str(&raw, yaml)
    }

    /// Parses config content; `yaml` selects the YAML parser, else JSON.
    pub fn from_str(content: &str, yaml: bool) -> Result<Self, ConfigError> {
        let content = interpolate_env(content);
        let cfg: AppConfig = if yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(cfg)
    }

    /// Looks up a model by id.
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.get(id)
    }

    /// Resolves `model_id` (empty selects the default) to an id + config.
    pub fn model_or_default(&self, model_id: &str) -> Result<(String, &ModelConfig), ConfigError> {
        let id = if model_id.is_empty() {
            if self.default_model.is_empty() {
                self.models
                    .keys()
                    .next()
                    .map(String::as_str)
                    .ok_or(ConfigError::NoModels)?
            } else {
                self.default_model.as_str()
            }
        } else {
            model_id
        };
        let cfg = self
            .models
            .get(id)
            .ok_or_else(|| ConfigError::UnknownModel(id.to_string()))?;
        Ok((id.to_string(), cfg))
    }

    /// Models visible to clients: placeholder and template keys are hidden.
    pub fn available_models(&self) -> Vec<ModelSummary> {
        self.models
            .iter()
            .filter(|(_, m)| m.key_resolved())
            .map(|(id, m)| m.summary(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
default_model: gpt-4o-mini
models:
  gpt-4o-mini:
    provider: openai
    model: gpt-4o-mini
    api_key: sk-test-123
    api_base: https://api.openai.com/v1
  hidden-model:
    provider: openai
    model: gpt-4o
    api_key: ${WAYFARER_MISSING_KEY}
  template-model:
    provider: anthropic
    model: claude-3-5-sonnet
    api_key: YOUR_API_KEY_HERE
agent:
  max_working_memory: 6
web:
  host: 0.0.0.0
  port: 8080
grpc:
  port: 50060
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let cfg = AppConfig::from_str(YAML, true).unwrap();
        assert_eq!(cfg.default_model, "gpt-4o-mini");
        assert_eq!(cfg.agent.max_working_memory, 6);
        assert_eq!(cfg.agent.max_steps, 10);
        assert_eq!(cfg.agent.session_idle_secs, 86_400);
        assert_eq!(cfg.web.port, 8080);
        assert_eq!(cfg.web.request_timeout_secs, 120);
        assert_eq!(cfg.rpc.port, 50060);
        assert_eq!(cfg.rpc.host, "127.0.0.1");
    }

    #[test]
    fn parses_json() {
        let cfg = AppConfig::from_str(
            r#"{"default_model":"m1","models":{"m1":{"provider":"openai","model":"gpt-4o-mini","api_key":"sk-x"}}}"#,
            false,
        )
        .unwrap();
        assert_eq!(cfg.model("m1").unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn load_picks_parser_from_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.models.len(), 3);
    }

    #[test]
    fn unresolved_and_template_keys_are_hidden() {
        std::env::remove_var("WAYFARER_MISSING_KEY");
        let cfg = AppConfig::from_str(YAML, true).unwrap();
        let visible = cfg.available_models();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].model_id, "gpt-4o-mini");
        // Hidden models stay addressable.
        assert!(cfg.model("hidden-model").is_some());
    }

    #[test]
    fn model_or_default_resolution() {
        let cfg = AppConfig::from_str(YAML, true).unwrap();
        let (id, _) = cfg.model_or_default("").unwrap();
        assert_eq!(id, "gpt-4o-mini");
        let (id, m) = cfg.model_or_default("template-model").unwrap();
        assert_eq!(id, "template-model");
        assert_eq!(m.provider, "anthropic");
        assert!(matches!(
            cfg.model_or_default("nope"),
            Err(ConfigError::UnknownModel(_))
        ));
    }

    #[test]
    fn interpolation_applies_to_values() {
        std::env::set_var("WAYFARER_TEST_KEY", "sk-from-env");
        let cfg = AppConfig::from_str(
            r#"{"models":{"m":{"provider":"openai","model":"x","api_key":"${WAYFARER_TEST_KEY}"}}}"#,
            false,
        )
        .unwrap();
        assert_eq!(cfg.model("m").unwrap().api_key, "sk-from-env");
        std::env::remove_var("WAYFARER_TEST_KEY");
    }
}
