//! ReAct loop: a bounded, early-terminating Think→Act→Observe→Evaluate cycle.

mod engine;
mod json;
mod planner;
mod types;

pub use engine::{EngineOptions, ReactEngine, Subscriber, ThinkStreamSink};
pub(crate) use engine::map_parameter_aliases;
pub use json::{extract_json_object, strip_markdown_fences};
pub use planner::{classify_task, extract_entities, TaskKind, TaskEntities, ThoughtEngine};
pub use types::{
    Action, ActionStatus, AgentState, Evaluation, Observation, PlannedStep, RunReport, StepRecord,
    Thought, ThoughtType,
};
