//! 核心层：引擎错误、助手构建器、会话运行器

pub mod builder;
pub mod error;
pub mod runner;

pub use builder::{create_llm_from_config, AssistantBuilder};
pub use error::EngineError;
pub use runner::{SessionRunner, TurnStream};
