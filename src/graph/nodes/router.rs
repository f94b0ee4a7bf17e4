//! router：固定温度的一次分类调用，决定走规划还是直接回答

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::nodes::complete_json;
use crate::graph::prompts;
use crate::graph::stage::{Stage, StageId, StageOutput};
use crate::graph::state::{ConversationState, Route, StateUpdate};
use crate::graph::structured::{format_instructions, Structured};
use crate::llm::LlmClient;
use crate::memory::history_window;

/// 路由结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RouterOutput {
    /// planner 或 direct_answer
    pub route: String,
}

pub struct RouterNode {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    default_route: Route,
    history_turns: usize,
}

impl RouterNode {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32, default_route: Route, history_turns: usize) -> Self {
        Self {
            llm,
            temperature,
            default_route,
            history_turns,
        }
    }

    pub async fn classify(&self, state: &ConversationState) -> Structured<Route> {
        let messages = prompts::router_messages(
            &state.question,
            history_window(&state.messages, self.history_turns),
            &format_instructions::<RouterOutput>(),
        );
        let result = complete_json::<RouterOutput>(self.llm.as_ref(), &messages, self.temperature)
            .await
            .and_then(|out| {
                Route::parse(&out.route).ok_or_else(|| format!("invalid route: {:?}", out.route))
            });
        Structured::from_result(result, || self.default_route)
    }
}

#[async_trait]
impl Stage for RouterNode {
    fn id(&self) -> StageId {
        StageId::Router
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        let structured = self.classify(state).await;
        if let Structured::Fallback { reason, value } = &structured {
            tracing::warn!("router fallback to {}: {}", value, reason);
        }
        let degraded = structured.used_fallback();
        let route = structured.into_value();
        tracing::info!("route: {}", route);

        StageOutput::new(StateUpdate::new().route(route), json!({ "route": route })).degraded(degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::nodes::test_support::{mock, state};

    #[tokio::test]
    async fn test_valid_route_is_used() {
        let llm = mock(&[r#"{"route": "direct_answer"}"#]);
        let node = RouterNode::new(llm.clone(), 0.0, Route::Planner, 20);
        let out = node.run(&state("你好")).await;

        assert_eq!(out.update.route, Some(Route::DirectAnswer));
        assert!(!out.degraded);
        assert_eq!(llm.calls()[0].options.temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_invalid_route_falls_back_to_default() {
        let llm = mock(&[r#"{"route": "search"}"#, "不是 JSON"]);
        let node = RouterNode::new(llm, 0.0, Route::Planner, 20);

        let first = node.run(&state("北京")).await;
        assert_eq!(first.update.route, Some(Route::Planner));
        assert!(first.degraded);

        let second = node.run(&state("北京")).await;
        assert_eq!(second.update.route, Some(Route::Planner));
        assert!(second.degraded);
    }

    #[tokio::test]
    async fn test_routing_is_deterministic_for_same_output() {
        let reply = r#"```json
{"route": "planner"}
```"#;
        let llm = mock(&[reply, reply, reply]);
        let node = RouterNode::new(llm, 0.0, Route::DirectAnswer, 20);
        for _ in 0..3 {
            let out = node.run(&state("我想逛北京一天")).await;
            assert_eq!(out.update.route, Some(Route::Planner));
        }
    }
}
