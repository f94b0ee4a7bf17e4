//! 会话状态：贯穿所有节点的 ConversationState，以及节点的部分更新 StateUpdate
//!
//! 每个字段在 [`StateField::merge_policy`] 中声明合并策略：
//! past_steps 与 messages 为 Append（只追加），其余字段为 Overwrite（整体覆盖）。
//! 图引擎只通过 [`StateUpdate::apply_to`] 修改状态。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// 需要规划、搜索、反思
    Planner,
    /// 闲聊或无需检索，直接回答
    DirectAnswer,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Planner => "planner",
            Route::DirectAnswer => "direct_answer",
        }
    }

    /// 宽松解析（忽略大小写与首尾空白）；未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planner" => Some(Route::Planner),
            "direct_answer" => Some(Route::DirectAnswer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已完成的子任务及其结果摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastStep {
    pub task: String,
    pub result: String,
}

impl PastStep {
    pub fn new(task: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            result: result.into(),
        }
    }
}

/// 会话状态（按 thread 持久化）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    pub question: String,
    /// 待执行任务队列（FIFO）
    pub plan: Vec<String>,
    /// 只追加
    pub past_steps: Vec<PastStep>,
    /// 非空即本轮结束
    pub response: String,
    pub route: Option<Route>,
    /// 只追加，跨轮次保留
    pub messages: Vec<Message>,
    pub user_id: String,
    /// 每轮重新检索，不持久化
    #[serde(skip)]
    pub memories: Vec<String>,
}

impl ConversationState {
    pub fn new(question: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// 新一轮输入合并到已有状态：覆盖 question / user_id，清空本轮字段，保留只追加字段
    pub fn begin_turn(&mut self, question: impl Into<String>, user_id: impl Into<String>) {
        self.question = question.into();
        self.user_id = user_id.into();
        self.plan.clear();
        self.response.clear();
        self.route = None;
        self.memories.clear();
    }

    pub fn is_done(&self) -> bool {
        !self.response.trim().is_empty()
    }
}

/// 状态字段标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Question,
    Plan,
    PastSteps,
    Response,
    Route,
    Messages,
    UserId,
    Memories,
}

/// 合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Overwrite,
    Append,
}

impl StateField {
    pub const ALL: [StateField; 8] = [
        StateField::Question,
        StateField::Plan,
        StateField::PastSteps,
        StateField::Response,
        StateField::Route,
        StateField::Messages,
        StateField::UserId,
        StateField::Memories,
    ];

    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            StateField::PastSteps | StateField::Messages => MergePolicy::Append,
            _ => MergePolicy::Overwrite,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateField::Question => "question",
            StateField::Plan => "plan",
            StateField::PastSteps => "past_steps",
            StateField::Response => "response",
            StateField::Route => "route",
            StateField::Messages => "messages",
            StateField::UserId => "user_id",
            StateField::Memories => "memories",
        }
    }
}

/// 节点的部分输出：None 表示不触碰该字段
///
/// 对 Append 字段，Some(vec) 表示「追加这些元素」，而不是新值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub question: Option<String>,
    pub plan: Option<Vec<String>>,
    pub past_steps: Option<Vec<PastStep>>,
    pub response: Option<String>,
    pub route: Option<Route>,
    pub messages: Option<Vec<Message>>,
    pub user_id: Option<String>,
    pub memories: Option<Vec<String>>,
}

fn merge_vec<T>(field: StateField, target: &mut Vec<T>, value: Option<Vec<T>>) {
    if let Some(value) = value {
        match field.merge_policy() {
            MergePolicy::Overwrite => *target = value,
            MergePolicy::Append => target.extend(value),
        }
    }
}

fn merge_scalar<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, plan: Vec<String>) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn past_step(mut self, step: PastStep) -> Self {
        self.past_steps.get_or_insert_with(Vec::new).push(step);
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.get_or_insert_with(Vec::new).push(message);
        self
    }

    pub fn memories(mut self, memories: Vec<String>) -> Self {
        self.memories = Some(memories);
        self
    }

    /// 本次更新触碰了哪些字段
    pub fn touched(&self) -> Vec<StateField> {
        StateField::ALL
            .into_iter()
            .filter(|f| match f {
                StateField::Question => self.question.is_some(),
                StateField::Plan => self.plan.is_some(),
                StateField::PastSteps => self.past_steps.is_some(),
                StateField::Response => self.response.is_some(),
                StateField::Route => self.route.is_some(),
                StateField::Messages => self.messages.is_some(),
                StateField::UserId => self.user_id.is_some(),
                StateField::Memories => self.memories.is_some(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.touched().is_empty()
    }

    /// 按合并策略表把更新应用到状态上
    pub fn apply_to(self, state: &mut ConversationState) {
        merge_scalar(&mut state.question, self.question);
        merge_vec(StateField::Plan, &mut state.plan, self.plan);
        merge_vec(StateField::PastSteps, &mut state.past_steps, self.past_steps);
        merge_scalar(&mut state.response, self.response);
        if self.route.is_some() {
            state.route = self.route;
        }
        merge_vec(StateField::Messages, &mut state.messages, self.messages);
        merge_scalar(&mut state.user_id, self.user_id);
        merge_vec(StateField::Memories, &mut state.memories, self.memories);
    }
}
