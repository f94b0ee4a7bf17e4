//! 雪花 ID：长期记忆记录的主键
//!
//! 41 位毫秒时间戳（自 2024-01-01 起）| 5 位数据中心 | 5 位机器 | 12 位序列号。
//! 数据中心与机器号可由环境变量 DATACENTER_ID / WORKER_ID 指定。

use std::sync::Mutex;

const DATACENTER_ID_BITS: u32 = 5;
const WORKER_ID_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;
const MAX_DATACENTER_ID: i64 = (1 << DATACENTER_ID_BITS) - 1;
const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

/// 2024-01-01T00:00:00Z
pub const DEFAULT_EPOCH_MS: i64 = 1_704_067_200_000;

#[derive(Debug)]
struct WorkerState {
    last_timestamp: i64,
    sequence: i64,
}

impl WorkerState {
    /// 推进到 now（不早于上次时间戳），返回本次使用的时间戳
    fn advance(&mut self, now: i64) -> i64 {
        let mut ts = now.max(self.last_timestamp);
        if ts == self.last_timestamp {
            self.sequence = (self.sequence + 1) & SEQUENCE_MASK;
            if self.sequence == 0 {
                ts += 1;
            }
        } else {
            self.sequence = 0;
        }
        self.last_timestamp = ts;
        ts
    }
}

/// 线程安全的雪花 ID 生成器
#[derive(Debug)]
pub struct SnowflakeIdWorker {
    datacenter_id: i64,
    worker_id: i64,
    epoch_ms: i64,
    state: Mutex<WorkerState>,
}

impl SnowflakeIdWorker {
    pub fn new(datacenter_id: i64, worker_id: i64, epoch_ms: i64) -> Self {
        Self {
            datacenter_id: datacenter_id & MAX_DATACENTER_ID,
            worker_id: worker_id & MAX_WORKER_ID,
            epoch_ms,
            state: Mutex::new(WorkerState {
                last_timestamp: -1,
                sequence: 0,
            }),
        }
    }

    /// 从环境变量创建
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<i64>().ok());
        Self::new(
            read("DATACENTER_ID").unwrap_or(0),
            read("WORKER_ID").unwrap_or(0),
            read("SNOWFLAKE_EPOCH_MS").unwrap_or(DEFAULT_EPOCH_MS),
        )
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// 生成下一个 ID（同一生成器内严格递增）
    ///
    /// 序列号用尽或时钟回拨时不等待，直接沿用 / 借用下一毫秒，持锁期间不阻塞 tokio worker。
    pub fn next_id(&self) -> i64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ts = state.advance(Self::now_ms());
        ((ts - self.epoch_ms) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence
    }
}

impl Default for SnowflakeIdWorker {
    fn default() -> Self {
        Self::from_env()
    }
}
