//! 节点标识、节点 trait 与条件边
//!
//! 图结构：memory_retrieve → router → {planner → executor ⇄ reflect | direct_answer} → memory_save → 结束。
//! 节点由封闭枚举 [`StageId`] 标识；两条条件边是 [`route_by_intent`] 与 [`ReflectDecision::classify`]。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::state::{ConversationState, Route, StateUpdate};

/// 七个节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    MemoryRetrieve,
    Router,
    Planner,
    Executor,
    Reflect,
    DirectAnswer,
    MemorySave,
}

impl StageId {
    pub const ENTRY: StageId = StageId::MemoryRetrieve;

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::MemoryRetrieve => "memory_retrieve",
            StageId::Router => "router",
            StageId::Planner => "planner",
            StageId::Executor => "executor",
            StageId::Reflect => "reflect",
            StageId::DirectAnswer => "direct_answer",
            StageId::MemorySave => "memory_save",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行位置：下一个要执行的节点（None 表示本轮已结束）与本轮已完成的反思次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub next: Option<StageId>,
    #[serde(default)]
    pub cycles: u32,
}

impl Cursor {
    pub fn start() -> Self {
        Self {
            next: Some(StageId::ENTRY),
            cycles: 0,
        }
    }

    pub fn terminal(cycles: u32) -> Self {
        Self { next: None, cycles }
    }

    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::start()
    }
}

/// 节点的一次输出
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub update: StateUpdate,
    /// node 事件的负载
    pub data: Value,
    /// 使用了回退值（解析失败、LLM 失败、记忆失败）
    pub degraded: bool,
}

impl StageOutput {
    pub fn new(update: StateUpdate, data: Value) -> Self {
        Self {
            update,
            data,
            degraded: false,
        }
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

/// 节点：读当前状态，返回部分更新；内部失败一律降级，不向外抛错
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    async fn run(&self, state: &ConversationState) -> StageOutput;
}

/// router 之后的条件边；route 缺失时走默认分支
pub fn route_by_intent(state: &ConversationState, default_route: Route) -> StageId {
    match state.route.unwrap_or(default_route) {
        Route::Planner => StageId::Planner,
        Route::DirectAnswer => StageId::DirectAnswer,
    }
}

/// executor 之后：搜索失败（response 已被设置）直接结束本轮，否则进入 reflect
pub fn after_executor(state: &ConversationState) -> Option<StageId> {
    if state.is_done() {
        None
    } else {
        Some(StageId::Reflect)
    }
}

/// reflect 之后的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectDecision {
    /// 给出了最终回答
    Done,
    /// 继续执行剩余计划
    Continue,
    /// 没有回答也没有后续计划（含解析失败），以空回答结束
    Stalled,
    /// 反思次数达到上限，强制结束
    Exhausted,
}

impl ReflectDecision {
    /// `cycles` 为包括本次在内已完成的反思次数
    pub fn classify(state: &ConversationState, cycles: u32, max_cycles: u32) -> Self {
        if state.is_done() {
            ReflectDecision::Done
        } else if state.plan.is_empty() {
            ReflectDecision::Stalled
        } else if cycles >= max_cycles {
            ReflectDecision::Exhausted
        } else {
            ReflectDecision::Continue
        }
    }

    pub fn next_stage(&self) -> StageId {
        match self {
            ReflectDecision::Continue => StageId::Executor,
            _ => StageId::MemorySave,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectDecision::Done => "done",
            ReflectDecision::Continue => "continue",
            ReflectDecision::Stalled => "stalled",
            ReflectDecision::Exhausted => "exhausted",
        }
    }
}

/// 无条件边
pub fn static_successor(stage: StageId) -> Option<StageId> {
    match stage {
        StageId::MemoryRetrieve => Some(StageId::Router),
        StageId::Planner => Some(StageId::Executor),
        StageId::DirectAnswer => Some(StageId::MemorySave),
        StageId::MemorySave => None,
        // 条件边
        StageId::Router | StageId::Executor | StageId::Reflect => None,
    }
}
