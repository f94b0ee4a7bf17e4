//! planner：把用户需求拆成可搜索的步骤；解析失败时计划为空（不重试）

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
use crate::memory::history_window;

/// 规划列表
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// 一系列具体的步骤，例如查询天气，查询景点等
    pub steps: Vec<String>,
}

pub struct PlannerNode {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    history_turns: usize,
}

impl PlannerNode {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32, history_turns: usize) -> Self {
        Self {
            llm,
            temperature,
            history_turns,
        }
    }
}

#[async_trait]
impl Stage for PlannerNode {
    fn id(&self) -> StageId {
        StageId::Planner
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        let messages = prompts::planner_messages(
            &state.question,
            history_window(&state.messages, self.history_turns),
            &state.memories,
            &state.past_steps,
            &format_instructions::<Plan>(),
        );
        let result = complete_json::<Plan>(self.llm.as_ref(), &messages, self.temperature)
            .await
            .map(|p| clean_items(p.steps));
        let structured = Structured::from_result(result, Vec::new);
        if let Structured::Fallback { reason, .. } = &structured {
            tracing::warn!("planner output unusable, plan left empty: {}", reason);
        }
        let degraded = structured.used_fallback();
        let plan = structured.into_value();
        tracing::info!("plan: {:?}", plan);

        StageOutput::new(StateUpdate::new().plan(plan.clone()), json!({ "plan": plan })).degraded(degraded)
    }
}
