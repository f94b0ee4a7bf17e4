//! 编排图：会话状态、节点、条件边、结构化输出与流式事件

pub mod engine;
pub mod events;
pub mod nodes;
pub mod prompts;
pub mod stage;
pub mod state;
pub mod structured;

pub use engine::{GraphSettings, OrchestrationGraph, StepOutcome};
pub use events::{ChunkData, EndData, ErrorData, TurnEvent};
pub use stage::{
    after_executor, route_by_intent, static_successor, Cursor, ReflectDecision, Stage, StageId,
    StageOutput,
};
pub use state::{ConversationState, MergePolicy, PastStep, Route, StateField, StateUpdate};
pub use structured::{parse_llm_json, ParseError, Structured};
