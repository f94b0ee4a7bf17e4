//! 断点存储的延迟初始化
//!
//! 阶段机：Uninitialized → Initializing → Ready | Degraded，阶段切换用原子 CAS；
//! 初始化本身由 tokio OnceCell 保证只执行一次，并发的首批请求等待同一次初始化。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::checkpoint::{Checkpointer, InMemoryCheckpointer, PersistenceMode, SqliteCheckpointer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitPhase {
    Uninitialized = 0,
    Initializing = 1,
    /// 已连接数据库
    Ready = 2,
    /// 未配置或连接失败，使用内存断点
    Degraded = 3,
}

impl InitPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => InitPhase::Initializing,
            2 => InitPhase::Ready,
            3 => InitPhase::Degraded,
            _ => InitPhase::Uninitialized,
        }
    }
}

pub struct PersistenceCell {
    database_url: Option<String>,
    phase: AtomicU8,
    cell: OnceCell<Arc<dyn Checkpointer>>,
}

impl PersistenceCell {
    pub fn new(database_url: Option<String>) -> Self {
        Self {
            database_url: database_url.filter(|u| !u.trim().is_empty()),
            phase: AtomicU8::new(InitPhase::Uninitialized as u8),
            cell: OnceCell::new(),
        }
    }

    /// 直接注入已构建好的断点存储
    pub fn ready(checkpointer: Arc<dyn Checkpointer>) -> Self {
        let phase = match checkpointer.mode() {
            PersistenceMode::Durable => InitPhase::Ready,
            PersistenceMode::InMemory => InitPhase::Degraded,
        };
        Self {
            database_url: None,
            phase: AtomicU8::new(phase as u8),
            cell: OnceCell::new_with(Some(checkpointer)),
        }
    }

    pub fn phase(&self) -> InitPhase {
        InitPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// 获取断点存储，首次调用时初始化
    pub async fn get(&self) -> Arc<dyn Checkpointer> {
        if let Some(checkpointer) = self.cell.get() {
            return checkpointer.clone();
        }
        self.cell
            .get_or_init(|| async {
                if self
                    .phase
                    .compare_exchange(
                        InitPhase::Uninitialized as u8,
                        InitPhase::Initializing as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    tracing::debug!("checkpointer initialization already in progress");
                }
                let (checkpointer, phase) = self.initialize().await;
                self.phase.store(phase as u8, Ordering::Release);
                checkpointer
            })
            .await
            .clone()
    }

    async fn initialize(&self) -> (Arc<dyn Checkpointer>, InitPhase) {
        let Some(url) = self.database_url.as_deref() else {
            tracing::warn!("no checkpoint database configured, conversations will not survive a restart");
            return (Arc::new(InMemoryCheckpointer::new()), InitPhase::Degraded);
        };
        match SqliteCheckpointer::connect(url).await {
            Ok(checkpointer) => {
                tracing::info!("checkpoint database ready");
                (Arc::new(checkpointer), InitPhase::Ready)
            }
            Err(e) => {
                tracing::warn!("checkpoint database unavailable, falling back to in-memory: {}", e);
                (Arc::new(InMemoryCheckpointer::new()), InitPhase::Degraded)
            }
        }
    }
}
