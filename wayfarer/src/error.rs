//! Agent error type shared across the core crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("工具不存在: {0}")]
    ToolNotFound(String),

    #[error("缺少必需参数: {0}")]
    MissingParameter(String),

    #[error("工具执行超时: {name} ({timeout_secs}s)")]
    ToolTimeout { name: String, timeout_secs: u64 },

    #[error("工具执行失败: {0}")]
    ToolFailed(String),

    /// Transport-level LLM failure (connect, read, join). Retried with
    /// backoff by the client.
    #[error("网络错误: {0}")]
    LlmTransport(String),

    /// Upstream returned a non-2xx status. Terminal, never retried.
    #[error("HTTP {status}: {body}")]
    LlmHttp { status: u16, body: String },

    #[error("LLM响应缺少内容")]
    LlmEmptyResponse,

    #[error("超过最大重试次数")]
    LlmRetriesExhausted,

    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    #[error("未知模型: {0}")]
    UnknownModel(String),

    #[error("配置错误: {0}")]
    Config(#[from] env_config::ConfigError),
}
