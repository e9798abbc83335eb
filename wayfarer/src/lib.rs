//! Wayfarer core: a ReAct travel agent with a callback-based streaming
//! surface.
//!
//! Layering, leaves first: [`tools`] (registry + travel tool set) and [`llm`]
//! (OpenAI-compatible client) feed [`react`] (the Think→Act→Observe→Evaluate
//! loop), which [`orchestrator`] binds into a three-mode request processor.
//! [`memory`] holds per-session conversation state and [`session`] maps
//! session ids to orchestrators. Serving layers live in the `serve` and
//! `gateway` crates.

pub mod error;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod react;
pub mod session;
pub mod tools;

pub use error::AgentError;
pub use llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, MockLlm, OpenAiChat};
pub use memory::{Memory, MemoryMessage, Role, UserPreference};
pub use orchestrator::{Orchestrator, ProcessMode, RunResult, StreamHandler};
pub use react::{
    Action, ActionStatus, AgentState, Observation, ReactEngine, RunReport, StepRecord, Subscriber,
    ThinkStreamSink, Thought, ThoughtType,
};
pub use session::{OrchestratorFactory, SessionEntry, SessionStore, SessionSummary};
pub use tools::{ToolExecutor, ToolInfo, ToolRegistry};
