//! SQLite 长期记忆存储（sqlx 异步）
//!
//! 表 memory(id, user_id, content, embedding, created_at)：embedding 以 JSON 数组文本保存，
//! 检索时取出该用户的全部向量，在进程内按余弦相似度排序。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::llm::EmbeddingProvider;
use crate::memory::id::SnowflakeIdWorker;
use crate::memory::long_term::{rank_by_similarity, MemoryError, MemoryGateway, MemoryId};

pub struct SqliteMemoryStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    ids: SnowflakeIdWorker,
}

impl SqliteMemoryStore {
    /// 连接数据库（如 `sqlite:data/memory.db?mode=rwc`）并建表
    pub async fn connect(
        database_url: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, MemoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self::from_pool(pool, embedder);
        store.init_tables().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            pool,
            embedder,
            ids: SnowflakeIdWorker::default(),
        }
    }

    async fn init_tables(&self) -> Result<(), MemoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS memory (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memory_user ON memory(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MemoryGateway for SqliteMemoryStore {
    async fn add(&self, user_id: &str, text: &str) -> Result<MemoryId, MemoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::EmptyText);
        }
        let vector = self.embedder.embed(text).await.map_err(MemoryError::Embedding)?;
        let id = self.ids.next_id();

        sqlx::query(
            "INSERT INTO memory (id, user_id, content, embedding, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(text)
        .bind(serde_json::to_string(&vector)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::info!("memory saved for user {}: id={}", user_id, id);
        Ok(id)
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<String>, MemoryError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await.map_err(MemoryError::Embedding)?;

        let rows = sqlx::query("SELECT content, embedding FROM memory WHERE user_id = ? ORDER BY id ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let mut records: Vec<(String, Vec<f32>)> = Vec::with_capacity(rows.len());
        for row in rows {
            let content: String = row.get("content");
            let embedding: String = row.get("embedding");
            records.push((content, serde_json::from_str(&embedding)?));
        }

        let results = rank_by_similarity(
            records.iter().map(|(c, v)| (c.as_str(), v.as_slice())),
            &query_vector,
            top_k,
        );
        tracing::debug!("memory search for user {} found {} results", user_id, results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;

    async fn store(dir: &tempfile::TempDir) -> SqliteMemoryStore {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("memory.db").display());
        SqliteMemoryStore::connect(&url, Arc::new(HashingEmbedder::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_search_persist_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = store(&dir).await;
            s.add("1", "用户喜欢北京的美食和烤鸭").await.unwrap();
            s.add("1", "用户预算在两千元以内").await.unwrap();
            s.add("2", "另一个用户喜欢美食").await.unwrap();
            s.close().await;
        }

        let s = store(&dir).await;
        let results = s.search("1", "北京美食", 1).await.unwrap();
        assert_eq!(results, vec!["用户喜欢北京的美食和烤鸭".to_string()]);

        let all = s.search("1", "北京美食", 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_top_k_zero_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;
        s.add("1", "任何内容").await.unwrap();
        assert!(s.search("1", "任何", 0).await.unwrap().is_empty());
    }
}
