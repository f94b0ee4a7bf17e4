//! reflect：根据目标、已完成步骤与剩余计划，给出最终回答或新的计划
//!
//! response 非空：本轮完成，清空计划并把 (question, response) 追加到 messages；
//! 否则整体替换计划。解析失败按 {response: "", next_plan: []} 处理。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::nodes::{clean_items, complete_json};
use crate::graph::prompts;
use crate::graph::stage::{Stage, StageId, StageOutput};
use crate::graph::state::{ConversationState, StateUpdate};
use crate::graph::structured::{format_instructions, Structured};
use crate::llm::LlmClient;
use crate::memory::Message;

/// 重新规划或结束
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReflectOutput {
    /// 最终回答，如果还需要继续执行步骤，则为空字符串
    pub response: String,
    /// 剩余未完成的步骤列表
    #[serde(default)]
    pub next_plan: Vec<String>,
}

pub struct ReflectNode {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
}

impl ReflectNode {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self { llm, temperature }
    }
}

#[async_trait]
impl Stage for ReflectNode {
    fn id(&self) -> StageId {
        StageId::Reflect
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        let messages = prompts::reflect_messages(
            &state.question,
            &state.past_steps,
            &state.plan,
            &format_instructions::<ReflectOutput>(),
        );
        let result = complete_json::<ReflectOutput>(self.llm.as_ref(), &messages, self.temperature).await;
        let structured = Structured::from_result(result, ReflectOutput::default);
        if let Structured::Fallback { reason, .. } = &structured {
            tracing::warn!("reflect output unusable: {}", reason);
        }
        let degraded = structured.used_fallback();
        let output = structured.into_value();

        if !output.response.trim().is_empty() {
            tracing::info!("task complete, final answer generated");
            let update = StateUpdate::new()
                .response(output.response.clone())
                .plan(Vec::new())
                .message(Message::user(state.question.clone()))
                .message(Message::assistant(output.response.clone()));
            return StageOutput::new(update, json!({ "response": output.response })).degraded(degraded);
        }

        let next_plan = clean_items(output.next_plan);
        tracing::info!("continue, {} steps remaining: {:?}", next_plan.len(), next_plan);
        StageOutput::new(StateUpdate::new().plan(next_plan.clone()), json!({ "plan": next_plan }))
            .degraded(degraded)
    }
}
