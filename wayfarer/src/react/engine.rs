//! The ReAct loop engine.
//!
//! A run is a bounded loop of at most `max_steps` iterations. Each iteration
//! observes the previous action's result, thinks (analysis + plan on the
//! first iteration, reflection or inference afterwards), streams the thought
//! through the single-slot think sink, checks the stop conditions, executes
//! the step-index-th planned action through the registry, evaluates it, and
//! records the step.
//!
//! The think sink is awaited inline; it is the only synchronous back-pressure
//! coupling between the engine and the outside world. Subscribers never
//! retain the engine.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::planner::ThoughtEngine;
use super::types::{
    Action, ActionStatus, AgentState, Evaluation, Observation, PlannedStep, RunReport, StepRecord,
    Thought, ThoughtType,
};
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

/// Default terminal tool set: an answer-producing tool that succeeded ends
/// the run.
const TERMINAL_TOOLS: [&str; 3] = [
    "llm_chat",
    "generate_city_recommendation",
    "generate_route_plan",
];

/// Thought/action subscriber. Thought callbacks fire after the thought
/// exists; action callbacks fire on the Running transition and again on the
/// terminal transition.
pub trait Subscriber: Send + Sync {
    fn on_thought(&self, _thought: &Thought) {}
    fn on_action(&self, _action: &Action) {}
}

/// Single-slot streaming hook invoked right after each thought is produced,
/// with the thought text and the wall-clock seconds since the iteration
/// began.
#[async_trait]
pub trait ThinkStreamSink: Send + Sync {
    async fn emit(&self, content: &str, elapsed_secs: f64);
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub name: String,
    pub max_steps: usize,
    pub terminal_tools: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            name: "ReactAgent".into(),
            max_steps: 10,
            terminal_tools: TERMINAL_TOOLS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub struct ReactEngine {
    name: String,
    max_steps: usize,
    registry: Arc<ToolRegistry>,
    thoughts: ThoughtEngine,
    terminal_tools: HashSet<String>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    think_sink: Option<Arc<dyn ThinkStreamSink>>,

    state: AgentState,
    task: String,
    context: Map<String, Value>,
    current_step: usize,
    plan: Vec<PlannedStep>,
    action_history: Vec<Action>,
    thought_history: Vec<Thought>,
}

impl ReactEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        llm: Option<Arc<dyn LlmClient>>,
        options: EngineOptions,
    ) -> Self {
        Self {
            name: options.name,
            max_steps: options.max_steps,
            registry,
            thoughts: ThoughtEngine::new(llm),
            terminal_tools: options.terminal_tools.into_iter().collect(),
            subscribers: Vec::new(),
            think_sink: None,
            state: AgentState::Idle,
            task: String::new(),
            context: Map::new(),
            current_step: 0,
            plan: Vec::new(),
            action_history: Vec::new(),
            thought_history: Vec::new(),
        }
    }

    pub fn add_subscriber(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn set_think_sink(&mut self, sink: Arc<dyn ThinkStreamSink>) {
        self.think_sink = Some(sink);
    }

    pub fn clear_think_sink(&mut self) {
        self.think_sink = None;
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Clears all run state; ready for a new task.
    pub fn reset(&mut self) {
        self.state = AgentState::Idle;
        self.task.clear();
        self.context = Map::new();
        self.current_step = 0;
        self.plan.clear();
        self.action_history.clear();
        self.thought_history.clear();
        self.thoughts.reset();
    }

    /// Drives the loop to completion. Always terminates within `max_steps`
    /// iterations regardless of tool behavior.
    pub async fn run(&mut self, task: &str, context: Map<String, Value>) -> RunReport {
        self.reset();
        self.task = task.to_string();
        self.context = context;
        self.state = AgentState::Reasoning;
        tracing::info!(agent = %self.name, task = %truncate(task, 50), "开始执行任务");

        let mut history: Vec<StepRecord> = Vec::new();

        while self.current_step < self.max_steps {
            let step_started = Instant::now();

            let observation = self.observe();
            let thought = self.think(&observation).await;

            if let Some(sink) = self.think_sink.clone() {
                let elapsed = step_started.elapsed().as_secs_f64();
                let content = format!(
                    "步骤{}耗时: {:.1}秒\n\n{}",
                    self.current_step + 1,
                    elapsed,
                    thought.content
                );
                sink.emit(&content, elapsed).await;
            }

            if self.should_stop(&thought) {
                break;
            }

            let action = self.act().await;
            let evaluation = self.evaluate(&action);

            if let Some(result) = &action.result {
                self.context
                    .insert("last_result".into(), Value::Object(result.clone()));
            }
            self.current_step += 1;

            history.push(StepRecord {
                step: self.current_step,
                thought,
                action,
                evaluation,
                timestamp: Utc::now(),
            });
        }

        self.state = AgentState::Completed;
        self.build_report(history)
    }

    fn observe(&mut self) -> Observation {
        self.state = AgentState::Observing;
        let last_result = self
            .action_history
            .last()
            .and_then(|a| a.result.clone())
            .map(Value::Object)
            .unwrap_or(Value::Null);
        Observation {
            id: format!("obs_{}", self.current_step),
            source: "environment".into(),
            content: json!({
                "last_action": last_result,
                "step": self.current_step,
            }),
            kind: "data".into(),
        }
    }

    async fn think(&mut self, _observation: &Observation) -> Thought {
        self.state = AgentState::Reasoning;

        let thought = if self.current_step == 0 {
            let mut thought = self.thoughts.analyze_task(&self.task).await;
            let plan_thought = self
                .thoughts
                .plan_actions(&self.task, &self.registry.list())
                .await;
            thought.decision = plan_thought.decision.clone();
            thought
                .reasoning_chain
                .extend(plan_thought.reasoning_chain.clone());
            self.plan = plan_thought
                .decision
                .as_deref()
                .and_then(|d| serde_json::from_str::<Vec<PlannedStep>>(d).ok())
                .unwrap_or_default();
            thought
        } else {
            match self.action_history.last() {
                Some(last) if last.status == ActionStatus::Failed => {
                    let error = last.error.clone().unwrap_or_default();
                    let mut thought = self.thoughts.reflect(false);
                    thought.content = format!(
                        "【执行失败】步骤 {}\n\n【失败原因】{}\n【当前状态】需要调整策略或检查参数\n【后续行动】尝试其他工具或重新执行",
                        self.current_step, error
                    );
                    thought
                }
                Some(last) if last.status == ActionStatus::Success => {
                    let summary = summarise_result(last.result.as_ref());
                    let tool_name = last.tool_name.clone();
                    let mut thought = self.thoughts.create_thought(
                        ThoughtType::Inference,
                        format!(
                            "【执行成功】步骤 {} 完成\n\n【工具】{}\n【结果】{}",
                            self.current_step, tool_name, summary
                        ),
                    );
                    thought.reasoning_chain = vec![
                        format!("步骤 {} 执行状态：成功", self.current_step),
                        format!("工具 {} 返回结果", tool_name),
                        "评估是否需要继续执行或生成最终回答".into(),
                    ];
                    thought.confidence = 0.95;
                    thought
                }
                _ => {
                    let mut thought = self.thoughts.create_thought(
                        ThoughtType::Inference,
                        format!(
                            "【继续执行】步骤 {}\n\n根据执行计划，继续执行下一步操作",
                            self.current_step + 1
                        ),
                    );
                    thought.reasoning_chain = vec![format!("执行步骤 {}", self.current_step + 1)];
                    thought
                }
            }
        };

        self.thought_history.push(thought.clone());
        for subscriber in &self.subscribers {
            subscriber.on_thought(&thought);
        }
        thought
    }

    /// Stop when (a) a terminal tool succeeded, (b) a confident thought with
    /// a decision follows a success, or (c) the step bound is reached.
    fn should_stop(&self, thought: &Thought) -> bool {
        let last = self.action_history.last();

        if thought.kind == ThoughtType::Inference {
            if let Some(last) = last {
                if self.terminal_tools.contains(&last.tool_name) && last.succeeded() {
                    return true;
                }
            }
        }

        if thought.confidence > 0.9 && thought.decision.is_some() {
            if let Some(last) = last {
                if last.succeeded() {
                    return true;
                }
            }
        }

        self.current_step >= self.max_steps - 1
    }

    async fn act(&mut self) -> Action {
        self.state = AgentState::Acting;

        let Some(step) = self.plan.get(self.current_step).cloned() else {
            // Plan exhausted (or absent): synthetic no-op success.
            let mut action = Action::new(
                format!("action_{}", self.action_history.len()),
                "none",
                Map::new(),
            );
            let mut result = Map::new();
            result.insert("message".into(), json!("无操作需要执行"));
            action.mark_running();
            action.mark_success(result);
            self.action_history.push(action.clone());
            return action;
        };

        let params = map_parameter_aliases(step.params);
        let mut action = Action::new(
            format!("action_{}", self.action_history.len()),
            step.action.clone(),
            params.clone(),
        );
        action.mark_running();
        for subscriber in &self.subscribers {
            subscriber.on_action(&action);
        }

        match self.registry.execute(&step.action, params).await {
            Ok(result) => {
                action.mark_success(result);
                tracing::info!(tool = %action.tool_name, "工具执行成功");
            }
            Err(e) => {
                action.mark_failed(e.to_string());
                tracing::error!(tool = %action.tool_name, error = %e, "工具执行失败");
            }
        }
        for subscriber in &self.subscribers {
            subscriber.on_action(&action);
        }

        self.action_history.push(action.clone());
        action
    }

    fn evaluate(&mut self, action: &Action) -> Evaluation {
        self.state = AgentState::Evaluating;
        Evaluation {
            success: action.succeeded(),
            duration_ms: action.duration_ms,
            has_result: action.result.is_some(),
        }
    }

    fn build_report(&self, history: Vec<StepRecord>) -> RunReport {
        let successful_steps = history.iter().filter(|s| s.evaluation.success).count();
        let total_duration_ms = history.iter().map(|s| s.action.duration_ms).sum();
        RunReport {
            success: self.state == AgentState::Completed,
            task: self.task.clone(),
            steps_completed: history.len(),
            successful_steps,
            total_duration_ms,
            history,
            error: None,
        }
    }
}

/// Rewrites `city|destination|location` to `cities`, promoting scalars to
/// one-element lists. Tolerance for LLM schema drift; intentional.
pub(crate) fn map_parameter_aliases(params: Map<String, Value>) -> Map<String, Value> {
    let mut mapped = Map::new();
    for (key, value) in params {
        let key = match key.as_str() {
            "city" | "destination" | "location" => "cities".to_string(),
            _ => key,
        };
        let value = if key == "cities" {
            match value {
                Value::String(s) => json!([s]),
                other => other,
            }
        } else {
            value
        };
        mapped.insert(key, value);
    }
    mapped
}

/// Shape-aware summary of a tool result for inference thoughts.
fn summarise_result(result: Option<&Map<String, Value>>) -> String {
    let Some(result) = result else {
        return "无结果".to_string();
    };
    let ok = result
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if ok {
        if let Some(cities) = result.get("cities").and_then(Value::as_array) {
            let names: Vec<String> = cities
                .iter()
                .take(5)
                .map(|c| {
                    c.get("city")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| c.to_string())
                })
                .collect();
            return format!("获取到 {} 个推荐城市：{}", cities.len(), names.join(", "));
        }
        if let Some(plan) = result.get("route_plan").and_then(Value::as_array) {
            return format!("路线规划完成，共 {} 天行程", plan.len());
        }
    }
    if let Some(response) = result.get("response").and_then(Value::as_str) {
        return format!("LLM生成回答：{}...", truncate(response, 80));
    }
    if result.contains_key("info") {
        return "城市详细信息获取成功".to_string();
    }
    "工具执行成功".to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::tools::{ToolExecutor, ToolInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn registry_with_chat() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolInfo::new("llm_chat", "chat", json!({"type": "object", "properties": {}})),
            ToolExecutor::sync(|p| Ok(json!({"success": true, "response": format!("回答：{}", p["query"])}))),
        );
        Arc::new(registry)
    }

    fn options(max_steps: usize) -> EngineOptions {
        EngineOptions {
            max_steps,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn chat_task_terminates_after_terminal_tool_success() {
        let mut engine = ReactEngine::new(registry_with_chat(), None, options(10));
        let report = engine.run("你好", Map::new()).await;
        assert!(report.success);
        assert_eq!(report.steps_completed, 1);
        assert_eq!(report.successful_steps, 1);
        assert_eq!(report.history[0].action.tool_name, "llm_chat");
        assert_eq!(engine.state(), AgentState::Completed);
    }

    #[tokio::test]
    async fn run_is_bounded_by_max_steps() {
        // A tool that always fails keeps the loop reflecting; the step bound
        // must still end the run.
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolInfo::new("llm_chat", "chat", json!({"type": "object", "properties": {}})),
            ToolExecutor::sync(|_| Err(AgentError::ToolFailed("总是失败".into()))),
        );
        let mut engine = ReactEngine::new(Arc::new(registry), None, options(4));
        let report = engine.run("你好", Map::new()).await;
        assert!(report.success);
        assert!(report.steps_completed <= 4);
        assert_eq!(report.successful_steps, report.steps_completed - 1);
        assert_eq!(report.history[0].action.status, ActionStatus::Failed);
        // The failure produced a reflection on the following step.
        assert_eq!(report.history[1].thought.kind, ThoughtType::Reflection);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_fails_at_timeout_and_run_completes() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolInfo::new("llm_chat", "slow", json!({"type": "object", "properties": {}}))
                .timeout_secs(1),
            ToolExecutor::asynchronous(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(120)).await;
                    Ok(json!({"success": true}))
                })
            }),
        );
        let mut engine = ReactEngine::new(Arc::new(registry), None, options(3));
        let report = engine.run("你好", Map::new()).await;
        assert!(report.success);
        let failed = &report.history[0].action;
        assert_eq!(failed.status, ActionStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("超时"));
    }

    #[tokio::test]
    async fn subscribers_see_thoughts_and_action_transitions() {
        struct Counter {
            thoughts: AtomicUsize,
            running: AtomicUsize,
            terminal: AtomicUsize,
        }
        impl Subscriber for Counter {
            fn on_thought(&self, _t: &Thought) {
                self.thoughts.fetch_add(1, Ordering::SeqCst);
            }
            fn on_action(&self, a: &Action) {
                match a.status {
                    ActionStatus::Running => self.running.fetch_add(1, Ordering::SeqCst),
                    _ => self.terminal.fetch_add(1, Ordering::SeqCst),
                };
            }
        }

        let counter = Arc::new(Counter {
            thoughts: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            terminal: AtomicUsize::new(0),
        });
        let mut engine = ReactEngine::new(registry_with_chat(), None, options(10));
        engine.add_subscriber(counter.clone());
        engine.run("你好", Map::new()).await;

        // One executed action: seen once Running, once terminal.
        assert_eq!(counter.running.load(Ordering::SeqCst), 1);
        assert_eq!(counter.terminal.load(Ordering::SeqCst), 1);
        // Step-0 analysis thought plus the final inference thought.
        assert_eq!(counter.thoughts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn think_sink_fires_once_per_step_before_act() {
        struct Recorder(Mutex<Vec<String>>);
        #[async_trait]
        impl ThinkStreamSink for Recorder {
            async fn emit(&self, content: &str, _elapsed: f64) {
                self.0.lock().unwrap().push(content.to_string());
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut engine = ReactEngine::new(registry_with_chat(), None, options(10));
        engine.set_think_sink(recorder.clone());
        let report = engine.run("你好", Map::new()).await;

        let seen = recorder.0.lock().unwrap();
        // steps_completed + the final stopping thought.
        assert_eq!(seen.len(), report.steps_completed + 1);
        assert!(seen[0].starts_with("步骤1耗时"));
        assert!(seen[0].contains("【任务分析】"));
    }

    #[test]
    fn alias_map_promotes_scalars() {
        let mut params = Map::new();
        params.insert("city".into(), json!("北京"));
        params.insert("days".into(), json!(3));
        let mapped = map_parameter_aliases(params);
        assert_eq!(mapped["cities"], json!(["北京"]));
        assert_eq!(mapped["days"], 3);
        assert!(!mapped.contains_key("city"));

        let mut params = Map::new();
        params.insert("destination".into(), json!(["上海"]));
        let mapped = map_parameter_aliases(params);
        assert_eq!(mapped["cities"], json!(["上海"]));
    }

    #[test]
    fn result_summaries_recognise_shapes() {
        let cities: Map<String, Value> = serde_json::from_value(
            json!({"success": true, "cities": [{"city": "北京"}, {"city": "上海"}]}),
        )
        .unwrap();
        assert!(summarise_result(Some(&cities)).contains("2 个推荐城市"));

        let route: Map<String, Value> =
            serde_json::from_value(json!({"success": true, "route_plan": [{}, {}, {}]})).unwrap();
        assert!(summarise_result(Some(&route)).contains("3 天行程"));

        let response: Map<String, Value> =
            serde_json::from_value(json!({"response": "好的，给你安排"})).unwrap();
        assert!(summarise_result(Some(&response)).contains("LLM生成回答"));

        let info: Map<String, Value> =
            serde_json::from_value(json!({"success": true, "info": {}})).unwrap();
        assert_eq!(summarise_result(Some(&info)), "城市详细信息获取成功");
    }

    #[tokio::test]
    async fn reset_clears_run_state() {
        let mut engine = ReactEngine::new(registry_with_chat(), None, options(10));
        engine.run("你好", Map::new()).await;
        engine.reset();
        assert_eq!(engine.state(), AgentState::Idle);
        assert!(engine.action_history.is_empty());
        assert!(engine.thought_history.is_empty());
    }
}
