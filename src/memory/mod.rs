//! 记忆层：短期（会话内对话历史）、长期（跨会话、按用户的语义记忆）

pub mod conversation;
pub mod id;
pub mod long_term;
pub mod store;

pub use conversation::{format_history, history_window, Message, Role};
pub use id::SnowflakeIdWorker;
pub use long_term::{InMemoryMemory, MemoryError, MemoryGateway, MemoryId, MemoryRecord, NoopMemory};
pub use store::SqliteMemoryStore;
