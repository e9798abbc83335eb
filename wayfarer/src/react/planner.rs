//! Thought generation: task analysis, action planning, reflection.
//!
//! Two paths. The LLM path asks the model for a JSON plan and parses it with
//! the fallback ladder in [`super::json`]; any failure drops silently to the
//! rule path, which classifies the task by keyword buckets and extracts
//! entities by regex. Planning never raises.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::json::extract_json_object;
use super::types::{PlannedStep, Thought, ThoughtType};
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::tools::ToolInfo;

static DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*天").expect("days regex"));
static BUDGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*元").expect("budget regex"));

/// Ranked city extraction patterns. The first match whose candidate is not a
/// question word wins.
static CITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(.+?)\s+计划",
        r"^(.+?)\s+想要",
        r"(?:去|在|到)(.+?)(?:旅游|游玩|旅行)",
        r"(.+?)的?攻略",
        r"(?:去|在|到)([^，。,\s]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("city regex"))
    .collect()
});

const CITY_STOPWORDS: [&str; 4] = ["推荐", "建议", "哪些", "什么"];

const RECOMMEND_KEYWORDS: [&str; 4] = ["推荐", "建议", "哪些", "适合"];
const QUERY_KEYWORDS: [&str; 4] = ["查询", "搜索", "有什么", "信息"];
const PLANNING_KEYWORDS: [&str; 11] = [
    "规划", "计划", "路线", "行程", "安排", "攻略", "旅游", "旅行", "游玩", "出游", "出发",
];

/// Keyword bucket for a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Recommendation,
    Query,
    Planning,
    Chat,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Recommendation => "城市推荐",
            TaskKind::Query => "信息查询",
            TaskKind::Planning => "路线规划",
            TaskKind::Chat => "一般对话",
        }
    }
}

pub fn classify_task(task: &str) -> TaskKind {
    if RECOMMEND_KEYWORDS.iter().any(|k| task.contains(k)) {
        TaskKind::Recommendation
    } else if QUERY_KEYWORDS.iter().any(|k| task.contains(k)) {
        TaskKind::Query
    } else if PLANNING_KEYWORDS.iter().any(|k| task.contains(k)) {
        TaskKind::Planning
    } else {
        TaskKind::Chat
    }
}

/// Entities pulled from the raw task text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskEntities {
    pub city: Option<String>,
    pub days: Option<u32>,
    pub budget: Option<u32>,
}

pub fn extract_entities(task: &str) -> TaskEntities {
    let days = DAYS
        .captures(task)
        .and_then(|c| c[1].parse::<u32>().ok());
    let budget = BUDGET
        .captures(task)
        .and_then(|c| c[1].parse::<u32>().ok());

    let mut city = None;
    for pattern in CITY_PATTERNS.iter() {
        if let Some(c) = pattern.captures(task) {
            let candidate = c[1].trim();
            if !candidate.is_empty() && !CITY_STOPWORDS.iter().any(|w| candidate.contains(w)) {
                city = Some(candidate.to_string());
                break;
            }
        }
    }

    TaskEntities { city, days, budget }
}

/// Builds thoughts; monotonically numbers them within one run.
pub struct ThoughtEngine {
    llm: Option<Arc<dyn LlmClient>>,
    counter: u64,
}

impl ThoughtEngine {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm, counter: 0 }
    }

    pub fn create_thought(&mut self, kind: ThoughtType, content: impl Into<String>) -> Thought {
        self.counter += 1;
        Thought::new(format!("thought_{}", self.counter), kind, content)
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Analysis thought for the first iteration.
    pub async fn analyze_task(&mut self, task: &str) -> Thought {
        if let Some(llm) = self.llm.clone() {
            if let Some(thought) = self.analyze_with_llm(&llm, task).await {
                return thought;
            }
        }
        self.analyze_with_rules(task)
    }

    async fn analyze_with_llm(&mut self, llm: &Arc<dyn LlmClient>, task: &str) -> Option<Thought> {
        let system = "你是一个专业的旅游助手，负责分析用户的旅游需求。\n\n\
             可用工具：\n\
             - search_cities: 根据兴趣、预算搜索城市\n\
             - query_attractions: 查询城市景点\n\
             - get_city_info: 获取城市详情\n\
             - generate_route_plan: 生成详细路线规划\n\
             - llm_chat: 一般对话\n\n\
             请分析用户输入，判断意图，并决定使用哪些工具。";
        let user = format!(
            "用户输入：{task}\n\n请分析这个请求，以JSON格式返回intent、reasoning、tools和confidence。只返回JSON格式。"
        );
        let result = llm
            .chat(
                &[ChatMessage::system(system), ChatMessage::user(user)],
                ChatOptions::temperature(0.3),
            )
            .await
            .ok()?;
        let analysis = extract_json_object(&result.content)?;
        let analysis = analysis.as_object()?;

        let reasoning = analysis
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut thought =
            self.create_thought(ThoughtType::Analysis, format!("【任务分析】{reasoning}"));
        let steps: Vec<Value> = analysis
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .enumerate()
                    .map(|(i, tool)| match tool {
                        Value::Object(t) => json!({
                            "step": i + 1,
                            "action": t.get("name").and_then(Value::as_str).unwrap_or_default(),
                            "params": t.get("parameters").cloned().unwrap_or_else(|| json!({})),
                        }),
                        other => json!({"step": i + 1, "action": other.as_str().unwrap_or_default(), "params": {}}),
                    })
                    .collect()
            })
            .unwrap_or_default();
        thought.decision = serde_json::to_string(&steps).ok();
        thought.confidence = analysis
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.85);
        tracing::info!(confidence = thought.confidence, "LLM分析完成");
        Some(thought)
    }

    fn analyze_with_rules(&mut self, task: &str) -> Thought {
        let kind = classify_task(task);
        let entities = extract_entities(task);
        let content = format!(
            "【任务分析】用户输入：「{task}」\n【意图识别】任务类型={}\n【提取信息】city={:?}, days={:?}, budget={:?}",
            kind.label(),
            entities.city,
            entities.days,
            entities.budget,
        );
        let mut thought = self.create_thought(ThoughtType::Analysis, content);
        thought.confidence = 0.7;
        thought
    }

    /// Planning thought whose decision is the step list.
    pub async fn plan_actions(&mut self, task: &str, tools: &[ToolInfo]) -> Thought {
        if let Some(llm) = self.llm.clone() {
            if let Some(thought) = self.plan_with_llm(&llm, task, tools).await {
                return thought;
            }
        }
        self.plan_with_rules(task, tools)
    }

    async fn plan_with_llm(
        &mut self,
        llm: &Arc<dyn LlmClient>,
        task: &str,
        tools: &[ToolInfo],
    ) -> Option<Thought> {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|t| {
                let params = t
                    .parameters
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| {
                        props
                            .iter()
                            .map(|(k, v)| {
                                format!(
                                    "{k}({})",
                                    v.get("type").and_then(Value::as_str).unwrap_or("string")
                                )
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                format!("- {}: {} (参数: {params})", t.name, t.description)
            })
            .collect();

        let system = format!(
            "你是 ReAct 智能体，负责规划行动步骤。\n\n用户任务：{task}\n\n可用工具：\n{}\n\n\
             请规划执行步骤。返回JSON格式：\n\
             {{\n  \"reasoning\": \"选择理由\",\n  \"steps\": [\n    {{\"action\": \"工具名\", \"params\": {{\"参数名\": \"参数值\"}}, \"reasoning\": \"为什么选这个工具\"}}\n  ]\n}}",
            tool_lines.join("\n")
        );
        let result = llm
            .chat(&[ChatMessage::system(system)], ChatOptions::temperature(0.3))
            .await
            .ok()?;
        let plan = extract_json_object(&result.content)?;
        let plan = plan.as_object()?;
        let steps = plan.get("steps").and_then(Value::as_array)?;

        let reasoning = plan
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut thought =
            self.create_thought(ThoughtType::Planning, format!("【执行计划】{reasoning}"));
        let normalised: Vec<Value> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                json!({
                    "step": s.get("step").and_then(Value::as_u64).unwrap_or((i + 1) as u64),
                    "action": s
                        .get("action")
                        .or_else(|| s.get("tool"))
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    "params": s
                        .get("params")
                        .or_else(|| s.get("parameters"))
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                })
            })
            .collect();
        thought.decision = serde_json::to_string(&normalised).ok();
        thought.confidence = 0.9;
        Some(thought)
    }

    fn plan_with_rules(&mut self, task: &str, tools: &[ToolInfo]) -> Thought {
        let steps = decompose_task(task, tools);

        let mut content = format!(
            "【执行计划】根据任务分析结果，制定以下执行方案：\n\n【步骤规划】共{}个执行步骤\n\n【工具选择理由】",
            steps.len()
        );
        if steps.is_empty() {
            content.push_str("\n  无需工具调用，直接生成回答");
        } else {
            for step in &steps {
                let params: Vec<String> =
                    step.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                content.push_str(&format!(
                    "\n  选择 {}，参数：({})",
                    step.action,
                    params.join(", ")
                ));
            }
        }

        let mut thought = self.create_thought(ThoughtType::Planning, content);
        thought.confidence = 0.9;
        thought.reasoning_chain = vec![format!("任务分解完成：共{}个执行步骤", steps.len())];
        if steps.is_empty() {
            thought.reasoning_chain.push("无需工具调用".into());
        } else {
            let names: Vec<&str> = steps.iter().map(|s| s.action.as_str()).collect();
            thought
                .reasoning_chain
                .push(format!("工具调用序列：{}", names.join(" → ")));
        }
        thought.reasoning_chain.push("准备按计划执行各步骤".into());

        if !steps.is_empty() {
            thought.decision = serde_json::to_string(&steps).ok();
        }
        thought
    }

    /// Reflection after a failed action.
    pub fn reflect(&mut self, last_success: bool) -> Thought {
        let mut thought = self.create_thought(ThoughtType::Reflection, "反思行动结果");
        thought.reasoning_chain = vec![
            format!("行动成功：{last_success}"),
            if last_success {
                "改进建议：结果符合预期".to_string()
            } else {
                "改进建议：建议检查参数或尝试其他工具".to_string()
            },
        ];
        thought.confidence = if last_success { 0.9 } else { 0.6 };
        thought
    }
}

fn find_tool<'a>(tools: &'a [ToolInfo], needles: &[&str]) -> Option<&'a ToolInfo> {
    tools.iter().find(|t| {
        let name = t.name.to_lowercase();
        needles.iter().any(|n| name.contains(n))
    })
}

/// Rule-path decomposition: 1–3 planned steps per the keyword bucket table.
fn decompose_task(task: &str, tools: &[ToolInfo]) -> Vec<PlannedStep> {
    let mut steps: Vec<PlannedStep> = Vec::new();
    let entities = extract_entities(task);
    let days = entities.days.unwrap_or(3);

    fn push(steps: &mut Vec<PlannedStep>, action: &str, params: Map<String, Value>) {
        steps.push(PlannedStep {
            step: steps.len() + 1,
            action: action.to_string(),
            params,
        });
    }

    if RECOMMEND_KEYWORDS.iter().any(|k| task.contains(k)) {
        if let Some(tool) = find_tool(tools, &["recommend", "search"]) {
            let mut params = Map::new();
            params.insert("interests".into(), json!([]));
            params.insert("budget_min".into(), Value::Null);
            params.insert(
                "budget_max".into(),
                entities.budget.map(|b| json!(b)).unwrap_or(Value::Null),
            );
            params.insert("season".into(), Value::Null);
            push(&mut steps, &tool.name, params);
        }
    }

    if let Some(city) = &entities.city {
        if let Some(tool) = find_tool(tools, &["city_info", "attraction"]) {
            let mut params = Map::new();
            params.insert("city".into(), json!(city));
            push(&mut steps, &tool.name, params);
        }
    }

    if PLANNING_KEYWORDS.iter().any(|k| task.contains(k)) {
        if let Some(tool) = find_tool(tools, &["route", "plan"]) {
            let mut params = Map::new();
            params.insert(
                "city".into(),
                json!(entities.city.clone().unwrap_or_else(|| "未知".into())),
            );
            params.insert("days".into(), json!(days));
            push(&mut steps, &tool.name, params);
        }
    }

    if steps.is_empty() {
        if let Some(tool) = find_tool(tools, &["llm_chat"]) {
            let mut params = Map::new();
            params.insert("query".into(), json!(task));
            push(&mut steps, &tool.name, params);
        }
    }

    tracing::info!(count = steps.len(), "规则规划生成动作");
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use serde_json::json;

    fn tool(name: &str) -> ToolInfo {
        ToolInfo::new(name, "test tool", json!({"type": "object", "properties": {}}))
    }

    fn travel_tools() -> Vec<ToolInfo> {
        vec![
            tool("search_cities"),
            tool("query_attractions"),
            tool("get_city_info"),
            tool("generate_route_plan"),
            tool("llm_chat"),
        ]
    }

    #[test]
    fn classification_buckets() {
        assert_eq!(classify_task("推荐几个适合夏天的城市"), TaskKind::Recommendation);
        assert_eq!(classify_task("查询北京有什么景点"), TaskKind::Query);
        assert_eq!(classify_task("帮我规划北京三日游行程"), TaskKind::Planning);
        assert_eq!(classify_task("你好呀"), TaskKind::Chat);
    }

    #[test]
    fn entity_extraction() {
        let e = extract_entities("去北京旅游5天，预算3000元");
        assert_eq!(e.city.as_deref(), Some("北京"));
        assert_eq!(e.days, Some(5));
        assert_eq!(e.budget, Some(3000));
    }

    #[test]
    fn entity_extraction_rejects_question_words() {
        let e = extract_entities("推荐哪些城市的攻略");
        assert_eq!(e.city, None);
    }

    #[test]
    fn rule_plan_planning_task_targets_route_tool() {
        let mut engine = ThoughtEngine::new(None);
        let thought =
            futures::executor::block_on(engine.plan_actions("帮我规划北京3天行程", &travel_tools()));
        assert_eq!(thought.kind, ThoughtType::Planning);
        let steps: Vec<PlannedStep> =
            serde_json::from_str(thought.decision.as_ref().unwrap()).unwrap();
        assert!(steps.iter().any(|s| s.action == "generate_route_plan"));
        let route = steps
            .iter()
            .find(|s| s.action == "generate_route_plan")
            .unwrap();
        assert_eq!(route.params["days"], 3);
    }

    #[test]
    fn rule_plan_chat_fallback_uses_llm_chat() {
        let mut engine = ThoughtEngine::new(None);
        let thought = futures::executor::block_on(engine.plan_actions("你好", &travel_tools()));
        let steps: Vec<PlannedStep> =
            serde_json::from_str(thought.decision.as_ref().unwrap()).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, "llm_chat");
        assert_eq!(steps[0].params["query"], "你好");
    }

    #[tokio::test]
    async fn llm_plan_is_normalised() {
        let llm = MockLlm::new(
            r#"{"reasoning": "先查城市", "steps": [{"action": "get_city_info", "params": {"city": "北京"}, "reasoning": "x"}]}"#,
        );
        let mut engine = ThoughtEngine::new(Some(Arc::new(llm)));
        let thought = engine.plan_actions("北京怎么玩", &travel_tools()).await;
        let steps: Vec<PlannedStep> =
            serde_json::from_str(thought.decision.as_ref().unwrap()).unwrap();
        assert_eq!(steps[0].step, 1);
        assert_eq!(steps[0].action, "get_city_info");
        assert_eq!(thought.confidence, 0.9);
    }

    #[tokio::test]
    async fn malformed_llm_plan_falls_back_to_rules() {
        let llm = MockLlm::new("抱歉我不会输出JSON");
        let mut engine = ThoughtEngine::new(Some(Arc::new(llm)));
        let thought = engine.plan_actions("你好", &travel_tools()).await;
        let steps: Vec<PlannedStep> =
            serde_json::from_str(thought.decision.as_ref().unwrap()).unwrap();
        assert_eq!(steps[0].action, "llm_chat");
    }

    #[tokio::test]
    async fn llm_transport_failure_falls_back_to_rules() {
        let mut engine = ThoughtEngine::new(Some(Arc::new(MockLlm::failing("down"))));
        let thought = engine.analyze_task("推荐几个城市").await;
        assert_eq!(thought.kind, ThoughtType::Analysis);
        assert!((thought.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn reflection_confidence_tracks_outcome() {
        let mut engine = ThoughtEngine::new(None);
        assert!(engine.reflect(false).confidence < 0.7);
        assert!(engine.reflect(true).confidence > 0.8);
    }

    #[test]
    fn thought_ids_are_sequential() {
        let mut engine = ThoughtEngine::new(None);
        assert_eq!(engine.create_thought(ThoughtType::Analysis, "a").id, "thought_1");
        assert_eq!(engine.create_thought(ThoughtType::Planning, "b").id, "thought_2");
        engine.reset();
        assert_eq!(engine.create_thought(ThoughtType::Analysis, "c").id, "thought_1");
    }
}
