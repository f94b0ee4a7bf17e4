//! 进程内断点（未配置数据库或连接失败时的退化模式）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::checkpoint::{Checkpoint, Checkpointer, Cursor, PersistenceError, PersistenceMode};
use crate::graph::ConversationState;

#[derive(Default)]
pub struct InMemoryCheckpointer {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        cursor: Cursor,
    ) -> Result<u64, PersistenceError> {
        let mut state = state.clone();
        // memories 不属于持久化状态
        state.memories.clear();

        let mut entries = self.entries.write().await;
        let version = entries.get(thread_id).map(|c| c.version).unwrap_or(0) + 1;
        entries.insert(
            thread_id.to_string(),
            Checkpoint {
                thread_id: thread_id.to_string(),
                version,
                state,
                cursor,
                updated_at: Utc::now(),
            },
        );
        Ok(version)
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        Ok(self.entries.read().await.get(thread_id).cloned())
    }

    fn mode(&self) -> PersistenceMode {
        PersistenceMode::InMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StageId;

    #[tokio::test]
    async fn test_versions_increase_and_latest_wins() {
        let cp = InMemoryCheckpointer::new();
        let mut state = ConversationState::new("q1", "1");
        state.memories = vec!["不会被保存".into()];

        assert_eq!(cp.save("t1", &state, Cursor::start()).await.unwrap(), 1);
        state.question = "q2".into();
        let cursor = Cursor { next: Some(StageId::Router), cycles: 0 };
        assert_eq!(cp.save("t1", &state, cursor).await.unwrap(), 2);

        let loaded = cp.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.state.question, "q2");
        assert_eq!(loaded.cursor, cursor);
        assert!(loaded.state.memories.is_empty());
        assert!(cp.load("t2").await.unwrap().is_none());
        assert_eq!(cp.len().await, 1);

        cp.save("t2", &state, Cursor::start()).await.unwrap();
        assert_eq!(cp.len().await, 2);
    }
}
