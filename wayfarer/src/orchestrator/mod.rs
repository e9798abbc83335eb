//! Travel agent orchestrator: binds the ReAct engine, the tool registry and
//! the LLM client into a request processor with three modes and a
//! callback-based streaming surface.
//!
//! Callbacks are synchronous with respect to the orchestrator's task: the
//! next token is not emitted until the previous `on_answer_token` returns.
//! Combined with bounded queues in the serving layer, this is the
//! end-to-end back-pressure path.

mod answer;
mod reasoning;

pub use answer::{parse_structured_answer, render_markdown, split_into_chunks, StructuredAnswer};
pub use reasoning::{build_reasoning_text, tools_used};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use env_config::{AgentSection, ModelConfig};
use stream_frame::ReasoningInfo;

use crate::llm::{ChatMessage, ChatOptions, LlmClient, OpenAiChat};
use crate::memory::{Memory, Role, DEFAULT_ARCHIVE_CAPACITY};
use crate::react::{
    extract_json_object, EngineOptions, ReactEngine, StepRecord, ThinkStreamSink,
};
use crate::tools::{build_travel_registry, ToolRegistry, TravelCatalog};

/// Inter-token yield in streaming modes. Fair scheduling of the consumer,
/// not rate limiting.
const TOKEN_YIELD: Duration = Duration::from_millis(10);

const DIRECT_SYSTEM_PROMPT: &str =
    "你是一个专业的旅游助手。请根据用户的问题，提供详细、准确的旅游建议和规划。回答要简洁明了，条理清晰。";

/// Processing mode for one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessMode {
    /// One streaming LLM call, no tools, no loop.
    Direct,
    /// Unary plan → sequential tool execution → summarising answer.
    Plan,
    /// The full ReAct loop followed by a streamed final answer.
    #[default]
    React,
}

impl FromStr for ProcessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "plan" => Ok(Self::Plan),
            "react" => Ok(Self::React),
            other => Err(format!("unknown mode: {other} (use direct, plan, or react)")),
        }
    }
}

/// Final record handed to `on_done` and returned from every entry point.
#[derive(Clone, Debug, Default)]
pub struct RunResult {
    pub success: bool,
    pub answer: String,
    pub error: Option<String>,
    pub reasoning: Option<ReasoningInfo>,
    pub history: Vec<StepRecord>,
}

impl RunResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Streaming surface. All methods default to no-ops so callers implement
/// only what they consume.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// One call per ReAct step (React), per plan/step boundary (Plan), or
    /// once at entry (Direct).
    async fn on_thinking(&self, _content: &str, _elapsed_secs: f64) {}
    /// One call per answer token, in source order.
    async fn on_answer_token(&self, _token: &str) {}
    /// Exactly one call with the final result.
    async fn on_done(&self, _result: &RunResult) {}
}

/// Bridges the engine's think sink onto a stream handler.
struct HandlerThinkSink(Arc<dyn StreamHandler>);

#[async_trait]
impl ThinkStreamSink for HandlerThinkSink {
    async fn emit(&self, content: &str, elapsed_secs: f64) {
        self.0.on_thinking(content, elapsed_secs).await;
    }
}

pub struct Orchestrator {
    model_id: String,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    engine: ReactEngine,
    memory: Memory,
}

impl Orchestrator {
    /// Builds an orchestrator for one model configuration.
    pub fn new(model_id: impl Into<String>, model: &ModelConfig, agent: &AgentSection) -> Self {
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiChat::new(model));
        Self::with_llm(model_id, llm, agent)
    }

    /// Same wiring with an injected client; the test seam.
    pub fn with_llm(
        model_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        agent: &AgentSection,
    ) -> Self {
        let registry = Arc::new(build_travel_registry(
            TravelCatalog::shared(),
            Arc::clone(&llm),
        ));
        let engine = ReactEngine::new(
            Arc::clone(&registry),
            Some(Arc::clone(&llm)),
            EngineOptions {
                name: "TravelReactAgent".into(),
                max_steps: agent.max_steps,
                ..Default::default()
            },
        );
        Self {
            model_id: model_id.into(),
            llm,
            registry,
            engine,
            memory: Memory::new(agent.max_working_memory, DEFAULT_ARCHIVE_CAPACITY),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Archives the current conversation into long-term memory and resets
    /// the engine for a fresh exchange.
    pub fn clear_conversation(&mut self) {
        self.memory.archive_current();
        self.engine.reset();
    }

    fn engine_context(&self, user_input: &str) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("user_query".into(), json!(user_input));
        context.insert(
            "user_preference".into(),
            serde_json::to_value(self.memory.preference()).unwrap_or(Value::Null),
        );
        context
    }

    /// Unary entry point (ReAct mode, no streaming callbacks).
    pub async fn process(&mut self, user_input: &str) -> RunResult {
        self.memory.add_message(Role::User, user_input);
        let context = self.engine_context(user_input);
        let report = self.engine.run(user_input, context).await;

        if !report.success {
            return RunResult {
                success: false,
                error: report.error.clone(),
                history: report.history,
                ..Default::default()
            };
        }

        let answer = self.extract_answer(&report.history).await;
        self.memory.add_message(Role::Assistant, answer.clone());
        RunResult {
            success: true,
            answer,
            error: None,
            reasoning: Some(ReasoningInfo {
                text: build_reasoning_text(&report.history),
                total_steps: report.history.len(),
                tools_used: tools_used(&report.history),
            }),
            history: report.history,
        }
    }

    /// Streaming entry point. Exactly one `on_done` fires, after the last
    /// token.
    pub async fn process_stream(
        &mut self,
        user_input: &str,
        mode: ProcessMode,
        handler: Arc<dyn StreamHandler>,
    ) -> RunResult {
        let started = Instant::now();
        tracing::info!(input = %truncate(user_input, 50), ?mode, "开始流式处理");
        self.memory.add_message(Role::User, user_input);

        let result = match mode {
            ProcessMode::Direct => self.run_direct(user_input, &handler).await,
            ProcessMode::React => self.run_react(user_input, &handler).await,
            ProcessMode::Plan => self.run_plan(user_input, &handler).await,
        };

        if result.success {
            self.memory.add_message(Role::Assistant, result.answer.clone());
        }
        tracing::info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            success = result.success,
            "流式处理完成"
        );
        handler.on_done(&result).await;
        result
    }

    async fn run_direct(&mut self, user_input: &str, handler: &Arc<dyn StreamHandler>) -> RunResult {
        handler.on_thinking("直接模式：跳过工具调用，直接生成回答", 0.0).await;

        let messages = [
            ChatMessage::system(DIRECT_SYSTEM_PROMPT),
            ChatMessage::user(user_input),
        ];
        let mut stream = self
            .llm
            .chat_stream(&messages, ChatOptions::temperature(0.7))
            .await;
        let mut answer = String::new();
        while let Some(token) = stream.next().await {
            answer.push_str(&token);
            handler.on_answer_token(&token).await;
            tokio::time::sleep(TOKEN_YIELD).await;
        }

        RunResult {
            success: true,
            answer,
            ..Default::default()
        }
    }

    async fn run_react(&mut self, user_input: &str, handler: &Arc<dyn StreamHandler>) -> RunResult {
        self.engine
            .set_think_sink(Arc::new(HandlerThinkSink(Arc::clone(handler))));
        let context = self.engine_context(user_input);
        let report = self.engine.run(user_input, context).await;
        self.engine.clear_think_sink();

        if !report.success {
            return RunResult {
                success: false,
                error: report.error.clone(),
                history: report.history,
                ..Default::default()
            };
        }

        // A structured answer produced during the run renders locally;
        // otherwise a streaming LLM call synthesises the final answer.
        let mut answer = String::new();
        if let Some(markdown) = structured_answer_from_history(&report.history) {
            for chunk in split_into_chunks(&markdown) {
                answer.push_str(&chunk);
                handler.on_answer_token(&chunk).await;
                tokio::time::sleep(TOKEN_YIELD).await;
            }
        } else {
            let messages = [
                ChatMessage::system(DIRECT_SYSTEM_PROMPT),
                ChatMessage::user(user_input),
            ];
            let mut stream = self
                .llm
                .chat_stream(&messages, ChatOptions::temperature(0.7))
                .await;
            while let Some(token) = stream.next().await {
                answer.push_str(&token);
                handler.on_answer_token(&token).await;
                tokio::time::sleep(TOKEN_YIELD).await;
            }
        }

        RunResult {
            success: true,
            answer,
            error: None,
            reasoning: Some(ReasoningInfo {
                text: build_reasoning_text(&report.history),
                total_steps: report.history.len(),
                tools_used: tools_used(&report.history),
            }),
            history: report.history,
        }
    }

    async fn run_plan(&mut self, user_input: &str, handler: &Arc<dyn StreamHandler>) -> RunResult {
        let started = Instant::now();

        let plan = match self.request_plan(user_input).await {
            Ok(plan) => plan,
            Err(e) => return RunResult::failure(format!("处理失败: {e}")),
        };
        handler
            .on_thinking(
                &format!("【执行计划】共{}个步骤", plan.len()),
                started.elapsed().as_secs_f64(),
            )
            .await;

        let mut step_results: Vec<Value> = Vec::new();
        for (i, step) in plan.iter().enumerate() {
            let action = step
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let description = step
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or(&action)
                .to_string();
            handler
                .on_thinking(
                    &format!("步骤{}：{}", i + 1, description),
                    started.elapsed().as_secs_f64(),
                )
                .await;

            let params = step
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let params = crate::react::map_parameter_aliases(params);
            match self.registry.execute(&action, params).await {
                Ok(result) => step_results.push(json!({"tool": action, "result": result})),
                Err(e) => {
                    tracing::warn!(tool = %action, error = %e, "计划步骤失败");
                    step_results.push(json!({"tool": action, "error": e.to_string()}));
                }
            }
        }

        let answer = match self.summarise_plan(user_input, &step_results).await {
            Ok(answer) => answer,
            Err(e) => return RunResult::failure(format!("处理失败: {e}")),
        };
        for chunk in split_into_chunks(&answer) {
            handler.on_answer_token(&chunk).await;
            tokio::time::sleep(TOKEN_YIELD).await;
        }

        RunResult {
            success: true,
            answer,
            ..Default::default()
        }
    }

    /// Asks the model for `{steps:[{step, action, params, description}],
    /// estimated_time}`; any parse failure falls back to the rule planner's
    /// step list.
    async fn request_plan(&mut self, user_input: &str) -> Result<Vec<Value>, crate::AgentError> {
        let tool_names: Vec<String> = self.registry.list().into_iter().map(|t| t.name).collect();
        let system = format!(
            "你是一个旅游助手的规划器。可用工具：{}\n\n\
             请为用户请求制定执行计划，返回JSON格式：\n\
             {{\"steps\": [{{\"step\": 1, \"action\": \"工具名\", \"params\": {{}}, \"description\": \"说明\"}}], \"estimated_time\": \"预计耗时\"}}",
            tool_names.join(", ")
        );
        let resp = self
            .llm
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(user_input)],
                ChatOptions::temperature(0.3),
            )
            .await?;

        let steps = extract_json_object(&resp.content)
            .and_then(|v| v.get("steps").and_then(Value::as_array).cloned());
        match steps {
            Some(steps) if !steps.is_empty() => Ok(steps),
            _ => {
                tracing::warn!("计划JSON解析失败，回退到规则规划");
                let mut planner = crate::react::ThoughtEngine::new(None);
                let thought = planner.plan_actions(user_input, &self.registry.list()).await;
                let parsed: Vec<Value> = thought
                    .decision
                    .as_deref()
                    .and_then(|d| serde_json::from_str(d).ok())
                    .unwrap_or_default();
                Ok(parsed)
            }
        }
    }

    async fn summarise_plan(
        &self,
        user_input: &str,
        step_results: &[Value],
    ) -> Result<String, crate::AgentError> {
        let resp = self
            .llm
            .chat(
                &[
                    ChatMessage::system(DIRECT_SYSTEM_PROMPT),
                    ChatMessage::user(format!(
                        "用户请求：{}\n\n工具执行结果：\n{}\n\n请根据执行结果生成最终回答。",
                        user_input,
                        serde_json::to_string(step_results).unwrap_or_default()
                    )),
                ],
                ChatOptions::temperature(0.7),
            )
            .await?;
        Ok(resp.content)
    }

    /// Final answer for the unary path: structured render when available,
    /// else a unary LLM synthesis over the tool results.
    async fn extract_answer(&self, history: &[StepRecord]) -> String {
        if let Some(markdown) = structured_answer_from_history(history) {
            return markdown;
        }

        let tool_results: Vec<Value> = history
            .iter()
            .filter(|s| s.action.succeeded() && s.action.result.is_some())
            .map(|s| {
                json!({
                    "tool": s.action.tool_name,
                    "result": s.action.result,
                })
            })
            .collect();
        if tool_results.is_empty() {
            return "让我来帮你规划这次旅行吧！🎉".to_string();
        }

        match self
            .llm
            .chat(
                &[
                    ChatMessage::system(DIRECT_SYSTEM_PROMPT),
                    ChatMessage::user(format!(
                        "我想要规划一次旅行，这是我的查询结果：\n{}\n\n请生成最终回答。",
                        serde_json::to_string(&tool_results).unwrap_or_default()
                    )),
                ],
                ChatOptions::temperature(0.7),
            )
            .await
        {
            Ok(resp) => match extract_json_object(&resp.content)
                .as_ref()
                .and_then(parse_structured_answer)
            {
                Some(structured) => render_markdown(&structured),
                None => resp.content,
            },
            Err(e) => format!("生成回答失败：{e}"),
        }
    }
}

/// Scans the run history (newest first) for a structured answer an LLM tool
/// returned earlier; renders it as Markdown when found.
fn structured_answer_from_history(history: &[StepRecord]) -> Option<String> {
    for step in history.iter().rev() {
        if !step.action.succeeded() {
            continue;
        }
        let Some(result) = &step.action.result else {
            continue;
        };
        if let Some(response) = result.get("response").and_then(Value::as_str) {
            if let Some(parsed) = extract_json_object(response) {
                if let Some(structured) = parse_structured_answer(&parsed) {
                    return Some(render_markdown(&structured));
                }
            }
        }
        if let Some(recommendations) = result.get("recommendations") {
            if let Some(structured) = parse_structured_answer(recommendations) {
                return Some(render_markdown(&structured));
            }
        }
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
