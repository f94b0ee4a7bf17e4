//! memory_retrieve：按用户检索长期记忆，覆盖 memories；检索失败降级为空

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::graph::stage::{Stage, StageId, StageOutput};
use crate::graph::state::{ConversationState, StateUpdate};
use crate::memory::MemoryGateway;

pub struct MemoryRetrieveNode {
    memory: Arc<dyn MemoryGateway>,
    top_k: usize,
}

impl MemoryRetrieveNode {
    pub fn new(memory: Arc<dyn MemoryGateway>, top_k: usize) -> Self {
        Self { memory, top_k }
    }
}

#[async_trait]
impl Stage for MemoryRetrieveNode {
    fn id(&self) -> StageId {
        StageId::MemoryRetrieve
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        if !self.memory.enabled() || self.top_k == 0 {
            return StageOutput::new(
                StateUpdate::new().memories(Vec::new()),
                json!({ "memories": [], "skipped": true }),
            );
        }

        match self
            .memory
            .search(&state.user_id, &state.question, self.top_k)
            .await
        {
            Ok(memories) => {
                tracing::info!("recalled {} memories for user {}", memories.len(), state.user_id);
                StageOutput::new(
                    StateUpdate::new().memories(memories.clone()),
                    json!({ "memories": memories }),
                )
            }
            Err(e) => {
                tracing::warn!("memory search failed, continuing without memories: {}", e);
                StageOutput::new(
                    StateUpdate::new().memories(Vec::new()),
                    json!({ "memories": [], "error": e.to_string() }),
                )
                .degraded(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::memory::{InMemoryMemory, MemoryError, MemoryId, NoopMemory};

    struct FailingMemory;

    #[async_trait]
    impl MemoryGateway for FailingMemory {
        async fn add(&self, _: &str, _: &str) -> Result<MemoryId, MemoryError> {
            Err(MemoryError::Storage("down".into()))
        }

        async fn search(&self, _: &str, _: &str, _: usize) -> Result<Vec<String>, MemoryError> {
            Err(MemoryError::Storage("down".into()))
        }
    }

    #[tokio::test]
    async fn test_overwrites_memories_with_search_results() {
        let memory = Arc::new(InMemoryMemory::new(Arc::new(HashingEmbedder::default())));
        memory.add("1", "用户喜欢北京烤鸭").await.unwrap();
        let node = MemoryRetrieveNode::new(memory, 3);

        let mut state = ConversationState::new("北京烤鸭哪家好", "1");
        state.memories = vec!["上一轮的旧记忆".into()];
        let out = node.run(&state).await;
        out.update.apply_to(&mut state);

        assert_eq!(state.memories, vec!["用户喜欢北京烤鸭".to_string()]);
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let node = MemoryRetrieveNode::new(Arc::new(FailingMemory), 3);
        let out = node.run(&ConversationState::new("q", "1")).await;
        assert!(out.degraded);
        assert_eq!(out.update.memories, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_disabled_gateway_is_skipped() {
        let node = MemoryRetrieveNode::new(Arc::new(NoopMemory), 3);
        let out = node.run(&ConversationState::new("q", "1")).await;
        assert_eq!(out.data["skipped"], true);
        assert_eq!(out.update.memories, Some(Vec::new()));
    }
}
