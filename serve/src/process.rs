//! Unary `Process` handler: run the agent to completion, return one message.

use serde_json::Value;
use std::sync::Arc;

use stream_frame::{
    AgentResponse, ErrorResponse, HistoryStep, MessageRequest, MessageResponse,
};
use wayfarer::RunResult;

use super::app::AppState;

pub(crate) async fn handle_process(req: MessageRequest, state: &Arc<AppState>) -> AgentResponse {
    let (_entry, mut guard) = match state.sessions.checkout(&req.session_id, &req.model_id).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(session = %req.session_id, error = %e, "处理消息失败");
            return AgentResponse::Error(ErrorResponse {
                error: e.to_string(),
            });
        }
    };
    let orchestrator = guard.as_mut().expect("orchestrator built at checkout");
    let result = orchestrator.process(&req.user_input).await;
    AgentResponse::Message(build_message_response(result))
}

pub(crate) fn build_message_response(result: RunResult) -> MessageResponse {
    let history = result
        .history
        .iter()
        .map(|step| HistoryStep {
            step: step.step,
            thought: serde_json::to_value(&step.thought).unwrap_or(Value::Null),
            action: serde_json::to_value(&step.action).unwrap_or(Value::Null),
            evaluation: serde_json::to_value(step.evaluation).unwrap_or(Value::Null),
            timestamp: step.timestamp.to_rfc3339(),
        })
        .collect();
    MessageResponse {
        success: result.success,
        answer: result.answer,
        error: result.error,
        reasoning: result.reasoning,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_frame::ReasoningInfo;

    #[test]
    fn failure_result_maps_to_error_fields() {
        let resp = build_message_response(RunResult {
            success: false,
            error: Some("处理失败: 超时".into()),
            ..Default::default()
        });
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("处理失败: 超时"));
        assert!(resp.history.is_empty());
    }

    #[test]
    fn success_result_keeps_reasoning() {
        let resp = build_message_response(RunResult {
            success: true,
            answer: "好的".into(),
            reasoning: Some(ReasoningInfo {
                text: "<thinking>…</thinking>".into(),
                total_steps: 2,
                tools_used: vec!["llm_chat".into()],
            }),
            ..Default::default()
        });
        assert!(resp.success);
        assert_eq!(resp.reasoning.unwrap().total_steps, 2);
    }
}
