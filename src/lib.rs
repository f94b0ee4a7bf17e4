//! 旅行规划助手 - 规划 / 执行 / 反思编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 日志初始化
//! - **core**: 引擎错误、助手构建器、SessionRunner
//! - **graph**: 会话状态、七个节点、条件边、结构化输出、流式事件
//! - **checkpoint**: 按 thread 保存 / 读取断点（内存 / SQLite，延迟初始化）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与嵌入
//! - **memory**: 对话历史与按用户隔离的长期记忆
//! - **tools**: 网页搜索（Tavily）

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{AssistantBuilder, EngineError, SessionRunner, TurnStream};
pub use crate::graph::{ConversationState, Route, StageId, TurnEvent};
