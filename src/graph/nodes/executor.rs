//! executor：取计划队首任务，生成搜索词、搜索、摘要，追加到 past_steps
//!
//! 搜索失败时把「搜索失败：<错误>」写入 response 并清空计划，本轮随即结束（不经过 reflect）。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::nodes::complete_json;
use crate::graph::prompts;
use crate::graph::stage::{Stage, StageId, StageOutput};
use crate::graph::state::{ConversationState, PastStep, StateUpdate};
use crate::graph::structured::format_instructions;
use crate::llm::{CompletionOptions, LlmClient};
use crate::tools::{render_results, WebSearch};

/// 搜索结果摘要
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    /// 与任务相关的关键信息摘要
    pub summary: String,
}

pub struct ExecutorNode {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn WebSearch>,
    temperature: f32,
    max_result_chars: usize,
    summary_fallback_chars: usize,
}

impl ExecutorNode {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<dyn WebSearch>, temperature: f32) -> Self {
        Self {
            llm,
            search,
            temperature,
            max_result_chars: 8000,
            summary_fallback_chars: 500,
        }
    }

    pub fn with_limits(mut self, max_result_chars: usize, summary_fallback_chars: usize) -> Self {
        self.max_result_chars = max_result_chars;
        self.summary_fallback_chars = summary_fallback_chars;
        self
    }

    /// 任务描述 → 搜索关键词；失败时直接用任务原文
    async fn search_query(&self, task: &str) -> (String, bool) {
        let options = CompletionOptions::default().with_temperature(self.temperature);
        match self
            .llm
            .complete(&prompts::search_query_messages(task), &options)
            .await
        {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), false),
            Ok(_) => {
                tracing::warn!("empty search query, using task text");
                (task.to_string(), true)
            }
            Err(e) => {
                tracing::warn!("search query generation failed, using task text: {}", e);
                (task.to_string(), true)
            }
        }
    }

    /// 原始结果 → 摘要；失败时截取原始结果前若干字符
    async fn summarize(&self, task: &str, raw: &str) -> (String, bool) {
        let messages = prompts::summary_messages(task, raw, &format_instructions::<Summary>());
        match complete_json::<Summary>(self.llm.as_ref(), &messages, self.temperature).await {
            Ok(s) if !s.summary.trim().is_empty() => (s.summary.trim().to_string(), false),
            Ok(_) => {
                tracing::warn!("empty summary, keeping raw result prefix");
                (raw.chars().take(self.summary_fallback_chars).collect(), true)
            }
            Err(e) => {
                tracing::warn!("summary failed, keeping raw result prefix: {}", e);
                (raw.chars().take(self.summary_fallback_chars).collect(), true)
            }
        }
    }
}

#[async_trait]
impl Stage for ExecutorNode {
    fn id(&self) -> StageId {
        StageId::Executor
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        let Some(task) = state.plan.first() else {
            tracing::warn!("executor reached with empty plan");
            return StageOutput::new(StateUpdate::new().response(""), json!({ "skipped": true }));
        };
        tracing::info!("executing task: {}", task);

        let (query, query_degraded) = self.search_query(task).await;
        tracing::info!("search query: {}", query);

        let results = match self.search.search(&query).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("search failed: {}", e);
                let message = format!("搜索失败：{}", e);
                return StageOutput::new(
                    StateUpdate::new().response(message.clone()).plan(Vec::new()),
                    json!({ "task": task, "query": query, "error": message }),
                )
                .degraded(query_degraded);
            }
        };

        let raw = render_results(&results, self.max_result_chars);
        tracing::info!("search result length: {}", raw.chars().count());
        let (summary, summary_degraded) = self.summarize(task, &raw).await;
        tracing::info!("summary length: {}", summary.chars().count());

        let step = PastStep::new(task.clone(), summary);
        let remaining = state.plan[1..].to_vec();
        StageOutput::new(
            StateUpdate::new().past_step(step.clone()).plan(remaining),
            json!({ "past_step": step, "query": query }),
        )
        .degraded(query_degraded || summary_degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::nodes::test_support::{mock, state};
    use crate::llm::{LlmError, MockLlmClient, MockReply};
    use crate::tools::{MockSearch, SearchError};

    fn planned(tasks: &[&str]) -> ConversationState {
        let mut s = state("我想逛北京一天");
        s.plan = tasks.iter().map(|t| t.to_string()).collect();
        s
    }

    #[tokio::test]
    async fn test_pops_head_and_appends_summary() {
        let llm = mock(&["故宫 开放时间", r#"{"summary": "故宫 8:30 开门，周一闭馆"}"#]);
        let search = Arc::new(MockSearch::new());
        let node = ExecutorNode::new(llm, search.clone(), 0.7);

        let mut s = planned(&["查询故宫开放时间", "查询北京美食"]);
        let out = node.run(&s).await;
        assert!(!out.degraded);
        out.update.apply_to(&mut s);

        assert_eq!(s.plan, vec!["查询北京美食".to_string()]);
        assert_eq!(s.past_steps, vec![PastStep::new("查询故宫开放时间", "故宫 8:30 开门，周一闭馆")]);
        assert_eq!(search.queries(), vec!["故宫 开放时间"]);
        assert!(s.response.is_empty());
    }

    #[tokio::test]
    async fn test_empty_plan_is_noop() {
        let llm = mock(&[]);
        let node = ExecutorNode::new(llm.clone(), Arc::new(MockSearch::new()), 0.7);
        let mut s = state("q");
        s.past_steps = vec![PastStep::new("a", "b")];
        let out = node.run(&s).await;
        out.update.apply_to(&mut s);

        assert!(s.response.is_empty());
        assert_eq!(s.past_steps.len(), 1);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_search_failure_sets_literal_response() {
        let llm = mock(&["故宫"]);
        let search = Arc::new(MockSearch::with_results(vec![Err(SearchError::Transport("timeout".into()))]));
        let node = ExecutorNode::new(llm, search, 0.7);

        let mut s = planned(&["查询故宫", "查询美食"]);
        node.run(&s).await.update.apply_to(&mut s);

        assert_eq!(s.response, "搜索失败：Request failed: timeout");
        assert!(s.plan.is_empty());
        assert!(s.past_steps.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_uses_task_and_summary_failure_keeps_prefix() {
        let llm = Arc::new(MockLlmClient::with_replies(vec![
            MockReply::Err(LlmError::Transport("reset".into())),
            MockReply::Ok("没有 JSON".into()),
        ]));
        let search = Arc::new(MockSearch::with_results(vec![Ok(json!("天安门广场位于北京市中心"))]));
        let node = ExecutorNode::new(llm, search.clone(), 0.7).with_limits(8000, 5);

        let out = node.run(&planned(&["查询天安门"])).await;
        assert!(out.degraded);
        assert_eq!(search.queries(), vec!["查询天安门"]);
        let steps = out.update.past_steps.unwrap();
        assert_eq!(steps[0].result, "天安门广场");
    }
}
