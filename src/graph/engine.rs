//! 编排图：按 StageId 静态分发到节点，合并部分更新，计算下一位置
//!
//! 一次 [`OrchestrationGraph::step`] 只执行一个节点；持久化与事件推送由 SessionRunner 负责。

use std::sync::Arc;

use serde_json::Value;

use crate::config::AppConfig;
use crate::graph::nodes::{
    DirectAnswerNode, ExecutorNode, MemoryRetrieveNode, MemorySaveNode, PlannerNode, ReflectNode,
    RouterNode,
};
use crate::graph::stage::{
    after_executor, route_by_intent, static_successor, Cursor, ReflectDecision, Stage, StageId,
};
use crate::graph::state::{ConversationState, Route, StateUpdate};
use crate::llm::LlmClient;
use crate::memory::MemoryGateway;
use crate::tools::WebSearch;

/// 图参数（来自 [llm] / [search] / [memory] / [graph] 配置段）
#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub temperature: f32,
    pub router_temperature: f32,
    pub default_route: Route,
    pub max_reflect_cycles: u32,
    pub history_turns: usize,
    pub max_result_chars: usize,
    pub summary_fallback_chars: usize,
    pub memory_top_k: usize,
    pub save_enabled: bool,
    pub max_saved_per_turn: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl GraphSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            temperature: cfg.llm.temperature,
            router_temperature: cfg.llm.router_temperature,
            default_route: cfg.graph.default_route,
            max_reflect_cycles: cfg.graph.max_reflect_cycles.max(1),
            history_turns: cfg.app.max_context_turns,
            max_result_chars: cfg.search.max_result_chars,
            summary_fallback_chars: cfg.graph.summary_fallback_chars,
            memory_top_k: if cfg.memory.enabled { cfg.memory.top_k } else { 0 },
            save_enabled: cfg.memory.enabled && cfg.memory.save_enabled,
            max_saved_per_turn: cfg.memory.max_saved_per_turn,
        }
    }
}

/// 执行一个节点后的结果
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub stage: StageId,
    /// node 事件负载（降级时含 "fallback": true）
    pub data: Value,
    pub degraded: bool,
    /// 本节点设置的非空回答（对应一条 chunk 事件）
    pub response: Option<String>,
    pub decision: Option<ReflectDecision>,
    pub next: Cursor,
}

pub struct OrchestrationGraph {
    memory_retrieve: MemoryRetrieveNode,
    router: RouterNode,
    planner: PlannerNode,
    executor: ExecutorNode,
    reflect: ReflectNode,
    direct_answer: DirectAnswerNode,
    memory_save: MemorySaveNode,
    settings: GraphSettings,
}

impl OrchestrationGraph {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn WebSearch>,
        memory: Arc<dyn MemoryGateway>,
        settings: GraphSettings,
    ) -> Self {
        let s = &settings;
        Self {
            memory_retrieve: MemoryRetrieveNode::new(memory.clone(), s.memory_top_k),
            router: RouterNode::new(llm.clone(), s.router_temperature, s.default_route, s.history_turns),
            planner: PlannerNode::new(llm.clone(), s.temperature, s.history_turns),
            executor: ExecutorNode::new(llm.clone(), search, s.temperature)
                .with_limits(s.max_result_chars, s.summary_fallback_chars),
            reflect: ReflectNode::new(llm.clone(), s.temperature),
            direct_answer: DirectAnswerNode::new(llm.clone(), s.temperature, s.history_turns),
            memory_save: MemorySaveNode::new(llm, memory, s.temperature)
                .with_limits(s.save_enabled, s.max_saved_per_turn),
            settings,
        }
    }

    fn stage(&self, id: StageId) -> &dyn Stage {
        match id {
            StageId::MemoryRetrieve => &self.memory_retrieve,
            StageId::Router => &self.router,
            StageId::Planner => &self.planner,
            StageId::Executor => &self.executor,
            StageId::Reflect => &self.reflect,
            StageId::DirectAnswer => &self.direct_answer,
            StageId::MemorySave => &self.memory_save,
        }
    }

    /// 执行 cursor 指向的节点，把输出合并进 state；cursor 已结束时返回 None
    pub async fn step(&self, state: &mut ConversationState, cursor: Cursor) -> Option<StepOutcome> {
        let stage_id = cursor.next?;
        let output = self.stage(stage_id).run(state).await;

        let response = output
            .update
            .response
            .as_ref()
            .filter(|r| !r.trim().is_empty())
            .cloned();
        output.update.apply_to(state);

        let mut data = output.data;
        if output.degraded {
            if let Value::Object(map) = &mut data {
                map.insert("fallback".to_string(), Value::Bool(true));
            }
        }

        let mut cycles = cursor.cycles;
        let mut decision = None;
        let next = match stage_id {
            StageId::Router => Some(route_by_intent(state, self.settings.default_route)),
            StageId::Executor => after_executor(state),
            StageId::Reflect => {
                cycles += 1;
                let d = ReflectDecision::classify(state, cycles, self.settings.max_reflect_cycles);
                match d {
                    ReflectDecision::Exhausted => {
                        tracing::warn!(
                            "reflect cycle limit {} reached, ending turn",
                            self.settings.max_reflect_cycles
                        );
                        StateUpdate::new().plan(Vec::new()).apply_to(state);
                    }
                    ReflectDecision::Stalled => {
                        tracing::warn!("reflect produced neither answer nor plan, ending turn");
                    }
                    _ => {}
                }
                if let Value::Object(map) = &mut data {
                    map.insert("decision".to_string(), Value::String(d.as_str().to_string()));
                }
                decision = Some(d);
                Some(d.next_stage())
            }
            other => static_successor(other),
        };
        tracing::debug!(
            "stage {} done, next: {}",
            stage_id,
            next.map(|s| s.as_str()).unwrap_or("end")
        );

        Some(StepOutcome {
            stage: stage_id,
            data,
            degraded: output.degraded,
            response,
            decision,
            next: Cursor { next, cycles },
        })
    }

    /// 只重新检索长期记忆（memories 不入断点，续跑一轮时用它补回），不推进 cursor
    pub async fn recall(&self, state: &mut ConversationState) -> usize {
        let output = self.memory_retrieve.run(state).await;
        output.update.apply_to(state);
        state.memories.len()
    }

    /// 不做持久化地跑完剩余节点（测试与一次性调用）
    pub async fn run_to_end(&self, state: &mut ConversationState, mut cursor: Cursor) -> Vec<StepOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.step(state, cursor).await {
            cursor = outcome.next;
            outcomes.push(outcome);
        }
        outcomes
    }
}
