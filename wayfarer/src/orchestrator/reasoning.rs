//! Reasoning-trace text for the unary response: a `<thinking>` block with
//! four fixed sections built from the run history.

use chrono::Utc;

use crate::react::{ActionStatus, StepRecord, ThoughtType};

pub fn tools_used(history: &[StepRecord]) -> Vec<String> {
    let mut tools = Vec::new();
    for step in history {
        let name = &step.action.tool_name;
        if !name.is_empty() && name != "none" && !tools.contains(name) {
            tools.push(name.clone());
        }
    }
    tools
}

pub fn build_reasoning_text(history: &[StepRecord]) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
    if history.is_empty() {
        return format!(
            "<thinking>\n[Timestamp: {timestamp}]\n\n[Intent Analysis]\nNo reasoning history available.\n\n\
             [Context Evaluation]\nNo context available.\n\n[Response Planning]\nUnable to generate response.\n\n\
             [Constraint Check]\nNo constraints checked.\n</thinking>"
        );
    }

    let mut intent = Vec::new();
    let mut context = Vec::new();
    let mut planning = Vec::new();
    let mut constraints = Vec::new();

    for (i, step) in history.iter().enumerate() {
        let line = format!("Step {}: {}", i + 1, step.thought.content);
        match step.thought.kind {
            ThoughtType::Analysis => intent.push(line),
            ThoughtType::Planning | ThoughtType::Decision => planning.push(line),
            ThoughtType::Inference => {
                context.push(line);
                let tool = &step.action.tool_name;
                if !tool.is_empty() && tool != "none" {
                    let status = match step.action.status {
                        ActionStatus::Success => "SUCCESS",
                        ActionStatus::Failed => "FAILED",
                        _ => "RUNNING",
                    };
                    context.push(format!("  - Tool: {tool} [{status}]"));
                }
            }
            ThoughtType::Reflection => constraints.push(line),
        }
    }

    let intent_section = if intent.is_empty() {
        format!(
            "User query analysis based on {} reasoning steps.",
            history.len()
        )
    } else {
        intent.join("\n")
    };
    let context_section = if context.is_empty() {
        "No explicit context evaluation steps recorded.".to_string()
    } else {
        context.join("\n")
    };
    let planning_section = if planning.is_empty() {
        "Response generation based on tool execution results.".to_string()
    } else {
        planning.join("\n")
    };
    let constraint_section = if constraints.is_empty() {
        format!(
            "All constraints satisfied.\n- Total reasoning steps: {}\n- Tools executed: {}\n- Response format: Standard text response",
            history.len(),
            tools_used(history).len()
        )
    } else {
        constraints.join("\n")
    };

    format!(
        "<thinking>\n[Timestamp: {timestamp}]\n\n[Intent Analysis]\n{intent_section}\n\n\
         [Context Evaluation]\n{context_section}\n\n[Response Planning]\n{planning_section}\n\n\
         [Constraint Check]\n{constraint_section}\n</thinking>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::{Action, Evaluation, Thought};
    use serde_json::Map;

    fn step(kind: ThoughtType, tool: &str, status: ActionStatus) -> StepRecord {
        let mut action = Action::new("action_0", tool, Map::new());
        action.status = status;
        StepRecord {
            step: 1,
            thought: Thought::new("thought_1", kind, "【任务分析】测试"),
            action,
            evaluation: Evaluation {
                success: status == ActionStatus::Success,
                duration_ms: 1,
                has_result: false,
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_history_has_placeholder_sections() {
        let text = build_reasoning_text(&[]);
        assert!(text.starts_with("<thinking>"));
        assert!(text.contains("No reasoning history available."));
        assert!(text.ends_with("</thinking>"));
    }

    #[test]
    fn sections_route_by_thought_type() {
        let history = vec![
            step(ThoughtType::Analysis, "none", ActionStatus::Success),
            step(ThoughtType::Inference, "get_city_info", ActionStatus::Success),
            step(ThoughtType::Reflection, "llm_chat", ActionStatus::Failed),
        ];
        let text = build_reasoning_text(&history);
        assert!(text.contains("[Intent Analysis]\nStep 1:"));
        assert!(text.contains("  - Tool: get_city_info [SUCCESS]"));
        assert!(text.contains("[Constraint Check]\nStep 3:"));
    }

    #[test]
    fn tools_used_skips_noops_and_duplicates() {
        let history = vec![
            step(ThoughtType::Analysis, "none", ActionStatus::Success),
            step(ThoughtType::Inference, "get_city_info", ActionStatus::Success),
            step(ThoughtType::Inference, "get_city_info", ActionStatus::Success),
            step(ThoughtType::Inference, "llm_chat", ActionStatus::Success),
        ];
        assert_eq!(tools_used(&history), vec!["get_city_info", "llm_chat"]);
    }
}
