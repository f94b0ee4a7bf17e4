//! SQLite 断点（sqlx 异步）：表 checkpoints，thread_id 为主键，保存即 upsert

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::checkpoint::{Checkpoint, Checkpointer, Cursor, PersistenceError, PersistenceMode};
use crate::graph::ConversationState;

pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// 连接数据库（如 `sqlite:data/checkpoints.db?mode=rwc`）并建表
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::Connect(e.to_string()))?;
        let checkpointer = Self::from_pool(pool);
        checkpointer.init_tables().await?;
        Ok(checkpointer)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn init_tables(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state TEXT NOT NULL,
                cursor TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        cursor: Cursor,
    ) -> Result<u64, PersistenceError> {
        let state_json = serde_json::to_string(state)?;
        let cursor_json = serde_json::to_string(&cursor)?;
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            "INSERT INTO checkpoints (thread_id, version, state, cursor, updated_at)
             VALUES (?, 1, ?, ?, ?)
             ON CONFLICT(thread_id) DO UPDATE SET
                version = checkpoints.version + 1,
                state = excluded.state,
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
             RETURNING version",
        )
        .bind(thread_id)
        .bind(&state_json)
        .bind(&cursor_json)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        let version: i64 = row.get("version");
        Ok(version.max(0) as u64)
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        let row = sqlx::query(
            "SELECT version, state, cursor, updated_at FROM checkpoints WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.get("version");
        let state: String = row.get("state");
        let cursor: String = row.get("cursor");
        let updated_at: String = row.get("updated_at");
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| PersistenceError::Storage(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(Checkpoint {
            thread_id: thread_id.to_string(),
            version: version.max(0) as u64,
            state: serde_json::from_str(&state)?,
            cursor: serde_json::from_str(&cursor)?,
            updated_at,
        }))
    }

    fn mode(&self) -> PersistenceMode {
        PersistenceMode::Durable
    }
}
