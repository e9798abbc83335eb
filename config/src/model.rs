//! Per-model configuration and the client-facing summary shape.

use serde::{Deserialize, Serialize};

/// One entry under the `models` table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Human-readable name; falls back to the model id in summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Entry returned by the public model list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
}

impl ModelConfig {
    /// True when the api_key survived interpolation and is not a template
    /// marker. Unresolved keys keep the `${VAR}` shape; templates carry
    /// `YOUR_` in any case.
    pub fn key_resolved(&self) -> bool {
        let key = self.api_key.trim();
        if key.is_empty() {
            return false;
        }
        if key.starts_with("${") && key.ends_with('}') {
            return false;
        }
        !key.to_uppercase().contains("YOUR_")
    }

    pub fn summary(&self, id: &str) -> ModelSummary {
        ModelSummary {
            model_id: id.to_string(),
            name: self.name.clone().unwrap_or_else(|| id.to_string()),
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }
}
