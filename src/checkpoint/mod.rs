//! 会话断点：按 thread 保存 (状态, 执行位置)，每个节点完成后覆盖写入
//!
//! - [`InMemoryCheckpointer`]：进程内，无法跨进程续跑
//! - [`SqliteCheckpointer`]：sqlx SQLite，thread_id 上 upsert
//! - [`PersistenceCell`]：首次使用时才连接数据库，失败或未配置则退化为内存模式

pub mod lazy;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::graph::Cursor;
use crate::graph::ConversationState;

pub use lazy::{InitPhase, PersistenceCell};
pub use memory::InMemoryCheckpointer;
pub use sqlite::SqliteCheckpointer;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// 持久化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// 写入数据库，可跨进程续跑
    Durable,
    /// 仅进程内
    InMemory,
}

/// 某个 thread 的最新断点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// 每次保存 +1，从 1 开始
    pub version: u64,
    pub state: ConversationState,
    pub cursor: Cursor,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// 保存（最后写入者胜出），返回新版本号
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        cursor: Cursor,
    ) -> Result<u64, PersistenceError>;

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError>;

    fn mode(&self) -> PersistenceMode;
}
