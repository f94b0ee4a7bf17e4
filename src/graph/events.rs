//! 流式事件：每个节点完成后一条 node 事件，设置了回答时追加 chunk，最后是 end（或 error）

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::stage::StageId;
use crate::graph::state::Route;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndData {
    pub thread_id: String,
    pub response: String,
    pub route: Option<Route>,
    pub memories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub thread_id: String,
    /// 目前只有 persistence
    pub kind: String,
    pub message: String,
}

/// 一轮对话中推送给调用方的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Node { node: StageId, data: Value },
    Chunk { data: ChunkData },
    End { data: EndData },
    Error { data: ErrorData },
}

impl TurnEvent {
    pub fn node(node: StageId, data: Value) -> Self {
        TurnEvent::Node { node, data }
    }

    pub fn chunk(response: impl Into<String>) -> Self {
        TurnEvent::Chunk {
            data: ChunkData {
                response: response.into(),
            },
        }
    }

    pub fn persistence_error(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        TurnEvent::Error {
            data: ErrorData {
                thread_id: thread_id.into(),
                kind: "persistence".to_string(),
                message: message.into(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::End { .. } | TurnEvent::Error { .. })
    }

    /// 事件类型名（node / chunk / end / error）
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::Node { .. } => "node",
            TurnEvent::Chunk { .. } => "chunk",
            TurnEvent::End { .. } => "end",
            TurnEvent::Error { .. } => "error",
        }
    }
}
