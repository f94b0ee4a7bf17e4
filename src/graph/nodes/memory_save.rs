//! memory_save：从本轮问答中提炼用户的长期事实并写入记忆网关
//!
//! 只在本轮有回答且启用保存时调用一次 LLM；所有失败只记录日志，不改变 response。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::nodes::{clean_items, complete_json};
use crate::graph::prompts;
use crate::graph::stage::{Stage, StageId, StageOutput};
use crate::graph::state::{ConversationState, StateUpdate};
use crate::graph::structured::format_instructions;
use crate::llm::LlmClient;
use crate::memory::MemoryGateway;

/// 提炼出的用户记忆
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedMemories {
    /// 值得长期记住的用户事实或偏好，每条一句话；没有则为空数组
    #[serde(default)]
    pub memories: Vec<String>,
}

pub struct MemorySaveNode {
    llm: Arc<dyn LlmClient>,
    memory: Arc<dyn MemoryGateway>,
    enabled: bool,
    max_per_turn: usize,
    temperature: f32,
}

impl MemorySaveNode {
    pub fn new(llm: Arc<dyn LlmClient>, memory: Arc<dyn MemoryGateway>, temperature: f32) -> Self {
        Self {
            llm,
            memory,
            enabled: true,
            max_per_turn: 3,
            temperature,
        }
    }

    pub fn with_limits(mut self, enabled: bool, max_per_turn: usize) -> Self {
        self.enabled = enabled;
        self.max_per_turn = max_per_turn;
        self
    }

    fn skipped(reason: &str) -> StageOutput {
        StageOutput::new(StateUpdate::new(), json!({ "saved": [], "skipped": reason }))
    }
}

#[async_trait]
impl Stage for MemorySaveNode {
    fn id(&self) -> StageId {
        StageId::MemorySave
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        if !self.enabled || !self.memory.enabled() || self.max_per_turn == 0 {
            return Self::skipped("disabled");
        }
        if !state.is_done() {
            return Self::skipped("no response");
        }

        let messages = prompts::memory_extract_messages(
            &state.question,
            &state.response,
            &state.memories,
            &format_instructions::<ExtractedMemories>(),
        );
        let extracted =
            match complete_json::<ExtractedMemories>(self.llm.as_ref(), &messages, self.temperature).await {
                Ok(out) => clean_items(out.memories),
                Err(e) => {
                    tracing::warn!("memory extraction failed: {}", e);
                    return StageOutput::new(StateUpdate::new(), json!({ "saved": [], "error": e }))
                        .degraded(true);
                }
            };

        let mut saved = Vec::new();
        let mut degraded = false;
        let candidates = extracted
            .into_iter()
            .filter(|m| !state.memories.contains(m))
            .take(self.max_per_turn);
        for text in candidates {
            match self.memory.add(&state.user_id, &text).await {
                Ok(_) => saved.push(text),
                Err(e) => {
                    tracing::warn!("failed to save memory for user {}: {}", state.user_id, e);
                    degraded = true;
                }
            }
        }
        tracing::info!("saved {} memories for user {}", saved.len(), state.user_id);

        StageOutput::new(StateUpdate::new(), json!({ "saved": saved })).degraded(degraded)
    }
}
