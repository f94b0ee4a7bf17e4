//! 长期记忆：跨会话、按用户隔离的语义记忆
//!
//! MemoryGateway 支持 add(user_id, text) 与 search(user_id, query, top_k)，检索按向量相似度从近到远排序；
//! 记录一经写入不可修改，只追加。

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{cosine_similarity, EmbeddingProvider};
use crate::memory::id::SnowflakeIdWorker;

pub type MemoryId = i64;

/// 一条长期记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub user_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Empty memory text")]
    EmptyText,
}

impl From<sqlx::Error> for MemoryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// 长期记忆网关
#[async_trait]
pub trait MemoryGateway: Send + Sync {
    /// 写入一条记忆，返回记忆 ID
    async fn add(&self, user_id: &str, text: &str) -> Result<MemoryId, MemoryError>;

    /// 检索该用户最相关的 top_k 条记忆文本（从近到远）
    async fn search(&self, user_id: &str, query: &str, top_k: usize)
        -> Result<Vec<String>, MemoryError>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopMemory;

#[async_trait]
impl MemoryGateway for NoopMemory {
    async fn add(&self, _user_id: &str, _text: &str) -> Result<MemoryId, MemoryError> {
        Ok(0)
    }

    async fn search(
        &self,
        _user_id: &str,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// 按相似度排序后取 top_k（records 已按 user 过滤）
pub(crate) fn rank_by_similarity<'a, I>(records: I, query_vector: &[f32], top_k: usize) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut scored: Vec<(f32, &str)> = records
        .into_iter()
        .map(|(content, vector)| (cosine_similarity(query_vector, vector), content))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(top_k)
        .map(|(_, content)| content.to_string())
        .collect()
}

/// 进程内实现：向量保存在内存中，余弦相似度检索
pub struct InMemoryMemory {
    embedder: Arc<dyn EmbeddingProvider>,
    ids: SnowflakeIdWorker,
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryMemory {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            ids: SnowflakeIdWorker::default(),
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 该用户的全部记忆（按写入顺序）
    pub fn records_for(&self, user_id: &str) -> Vec<MemoryRecord> {
        self.records
            .read()
            .map(|r| r.iter().filter(|m| m.user_id == user_id).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MemoryGateway for InMemoryMemory {
    async fn add(&self, user_id: &str, text: &str) -> Result<MemoryId, MemoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::EmptyText);
        }
        let vector = self.embedder.embed(text).await.map_err(MemoryError::Embedding)?;
        let id = self.ids.next_id();
        let record = MemoryRecord {
            id,
            user_id: user_id.to_string(),
            content: text.to_string(),
            vector,
            created_at: Utc::now(),
        };
        self.records
            .write()
            .map_err(|e| MemoryError::Storage(e.to_string()))?
            .push(record);
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
        let records = self
            .records
            .read()
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        let results = rank_by_similarity(
            records
                .iter()
                .filter(|m| m.user_id == user_id)
                .map(|m| (m.content.as_str(), m.vector.as_slice())),
            &query_vector,
            top_k,
        );
        tracing::debug!("memory search for user {} found {} results", user_id, results.len());
        Ok(results)
    }
}
