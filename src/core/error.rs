//! 引擎层错误类型
//!
//! 节点内部的失败（解析失败、LLM 失败、记忆失败）都在节点内降级处理，不会出现在这里；
//! 只有配置错误与持久化失败会以 EngineError 的形式交给调用方。

use thiserror::Error;

use crate::checkpoint::PersistenceError;

/// SessionRunner / AssistantBuilder 可能返回的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
