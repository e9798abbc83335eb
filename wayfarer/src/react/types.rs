//! Typed records produced by the loop: thoughts, actions, observations,
//! per-step history, and the final run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

/// Loop phase. Transitions follow the ReAct cycle; `Completed`/`Error` are
/// terminal for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Reasoning,
    Acting,
    Observing,
    Evaluating,
    Completed,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThoughtType {
    Analysis,
    Planning,
    Decision,
    Reflection,
    Inference,
}

/// One reasoning step. `decision` is a JSON-serialised list of planned steps
/// (`[{step, action, params}, …]`) when the thought carries a plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ThoughtType,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

impl Thought {
    pub fn new(id: impl Into<String>, kind: ThoughtType, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            confidence: 0.85,
            reasoning_chain: Vec::new(),
            decision: None,
        }
    }
}

/// One tool invocation. Lifecycle: Pending → Running → Success | Failed;
/// `duration_ms` is populated on the terminal transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl Action {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            parameters,
            status: ActionStatus::Pending,
            result: None,
            error: None,
            duration_ms: 0,
            started_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = ActionStatus::Running;
        self.started_at = Some(Instant::now());
    }

    pub fn mark_success(&mut self, result: Map<String, Value>) {
        self.status = ActionStatus::Success;
        self.result = Some(result);
        self.finish();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ActionStatus::Failed;
        self.error = Some(error.into());
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(start) = self.started_at {
            self.duration_ms = start.elapsed().as_millis() as u64;
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// Packaged view of the previous action's result, produced at the start of
/// each iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub source: String,
    pub content: Value,
    #[serde(rename = "observation_type")]
    pub kind: String,
}

/// One entry of a planning decision list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step: usize,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// `{success, duration_ms, has_result}` verdict for one action.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Evaluation {
    pub success: bool,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub has_result: bool,
}

/// One recorded loop iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub thought: Thought,
    pub action: Action,
    pub evaluation: Evaluation,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one `run`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    pub task: String,
    pub steps_completed: usize,
    pub successful_steps: usize,
    #[serde(rename = "total_duration")]
    pub total_duration_ms: u64,
    pub history: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_lifecycle_tracks_duration() {
        let mut action = Action::new("action_0", "get_city_info", Map::new());
        assert_eq!(action.status, ActionStatus::Pending);
        action.mark_running();
        assert_eq!(action.status, ActionStatus::Running);
        let mut result = Map::new();
        result.insert("success".into(), json!(true));
        action.mark_success(result);
        assert!(action.succeeded());
        assert!(action.error.is_none());
    }

    #[test]
    fn failed_action_keeps_error_text() {
        let mut action = Action::new("action_1", "sleep_tool", Map::new());
        action.mark_running();
        action.mark_failed("工具执行超时: sleep_tool (1s)");
        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error.as_deref().unwrap().contains("超时"));
    }

    #[test]
    fn thought_serializes_type_tag() {
        let t = Thought::new("thought_1", ThoughtType::Planning, "【执行计划】");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "PLANNING");
        assert_eq!(json["confidence"], 0.85);
    }

    #[test]
    fn planned_step_deserializes_decision_entry() {
        let step: PlannedStep = serde_json::from_str(
            r#"{"step": 1, "action": "generate_route", "params": {"city": "北京", "days": 3}}"#,
        )
        .unwrap();
        assert_eq!(step.action, "generate_route");
        assert_eq!(step.params["days"], 3);
    }
}
