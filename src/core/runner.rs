//! SessionRunner：驱动一轮对话
//!
//! 读取 thread 的断点并合并本轮输入，从入口节点逐个执行，每个节点完成后写断点并推送事件。
//! 每轮在独立的 tokio 任务中运行：调用方丢弃事件流不会中断节点，本轮仍会跑完并写入断点。

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::checkpoint::{Checkpoint, Cursor, PersistenceCell, PersistenceMode};
use crate::core::EngineError;
use crate::graph::{ConversationState, EndData, OrchestrationGraph, StageId, TurnEvent};
use crate::llm::LlmClient;

/// 一轮对话的事件流，以 end 或 error 结束
pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

enum TurnStart {
    New { user_id: String, question: String },
    Resume(Checkpoint),
}

struct RunnerInner {
    graph: OrchestrationGraph,
    persistence: PersistenceCell,
    llm: Arc<dyn LlmClient>,
}

#[derive(Clone)]
pub struct SessionRunner {
    inner: Arc<RunnerInner>,
}

fn emit(tx: &mpsc::UnboundedSender<TurnEvent>, event: TurnEvent) {
    let kind = event.kind();
    if tx.send(event).is_err() {
        tracing::debug!("caller disconnected, dropping {} event", kind);
    }
}

fn into_stream(rx: mpsc::UnboundedReceiver<TurnEvent>) -> TurnStream {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    }))
}

impl SessionRunner {
    pub fn new(graph: OrchestrationGraph, persistence: PersistenceCell, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                graph,
                persistence,
                llm,
            }),
        }
    }

    /// 提交一轮对话
    pub fn submit(
        &self,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        question: impl Into<String>,
    ) -> TurnStream {
        let thread_id = thread_id.into();
        let user_id = user_id.into();
        let span = tracing::info_span!("turn", thread_id = %thread_id, user_id = %user_id);
        self.spawn_turn(
            thread_id,
            TurnStart::New {
                user_id,
                question: question.into(),
            },
            span,
        )
    }

    /// 继续一轮未完成的对话（进程崩溃或中途持久化失败后）；没有可续跑的断点时返回 None
    pub async fn resume(&self, thread_id: &str) -> Result<Option<TurnStream>, EngineError> {
        let checkpointer = self.inner.persistence.get().await;
        let Some(checkpoint) = checkpointer.load(thread_id).await? else {
            return Ok(None);
        };
        if checkpoint.cursor.is_terminal() {
            return Ok(None);
        }
        tracing::info!(
            "resuming thread {} at {:?} (version {})",
            thread_id,
            checkpoint.cursor.next,
            checkpoint.version
        );
        let span = tracing::info_span!(
            "turn",
            thread_id = %thread_id,
            user_id = %checkpoint.state.user_id,
            resumed = true
        );
        Ok(Some(self.spawn_turn(
            thread_id.to_string(),
            TurnStart::Resume(checkpoint),
            span,
        )))
    }

    /// 查看某个 thread 的最新断点
    pub async fn snapshot(&self, thread_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let checkpointer = self.inner.persistence.get().await;
        Ok(checkpointer.load(thread_id).await?)
    }

    pub async fn persistence_mode(&self) -> PersistenceMode {
        self.inner.persistence.get().await.mode()
    }

    fn spawn_turn(&self, thread_id: String, start: TurnStart, span: tracing::Span) -> TurnStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_turn(thread_id, start, tx).await }.instrument(span));
        into_stream(rx)
    }
}

impl RunnerInner {
    async fn run_turn(&self, thread_id: String, start: TurnStart, tx: mpsc::UnboundedSender<TurnEvent>) {
        let checkpointer = self.persistence.get().await;

        let (mut state, mut cursor) = match start {
            TurnStart::New { user_id, question } => {
                let mut state = match checkpointer.load(&thread_id).await {
                    Ok(Some(checkpoint)) => {
                        tracing::debug!("hydrated thread from version {}", checkpoint.version);
                        checkpoint.state
                    }
                    Ok(None) => ConversationState::default(),
                    Err(e) => {
                        tracing::error!("failed to load checkpoint: {}", e);
                        emit(&tx, TurnEvent::persistence_error(&thread_id, e.to_string()));
                        return;
                    }
                };
                state.begin_turn(question, user_id);
                (state, Cursor::start())
            }
            TurnStart::Resume(checkpoint) => {
                let mut state = checkpoint.state;
                // 断点里没有 memories，检索节点已经跑过时要补回来
                if checkpoint.cursor.next != Some(StageId::MemoryRetrieve) {
                    let recalled = self.graph.recall(&mut state).await;
                    tracing::debug!("recalled {} memories for resumed turn", recalled);
                }
                (state, checkpoint.cursor)
            }
        };
        tracing::info!("turn started: {}", state.question);

        if let Err(e) = checkpointer.save(&thread_id, &state, cursor).await {
            tracing::error!("failed to save checkpoint at turn start: {}", e);
            emit(&tx, TurnEvent::persistence_error(&thread_id, e.to_string()));
            return;
        }

        while let Some(outcome) = self.graph.step(&mut state, cursor).await {
            cursor = outcome.next;
            let saved = checkpointer.save(&thread_id, &state, cursor).await;

            emit(&tx, TurnEvent::node(outcome.stage, outcome.data));
            if let Some(response) = outcome.response {
                emit(&tx, TurnEvent::chunk(response));
            }
            if let Err(e) = saved {
                tracing::error!("failed to save checkpoint after {}: {}", outcome.stage, e);
                emit(&tx, TurnEvent::persistence_error(&thread_id, e.to_string()));
                return;
            }
        }

        let (prompt, completion, total) = self.llm.token_usage();
        tracing::info!(
            "turn finished: route={:?}, past_steps={}, messages={}, tokens(prompt={}, completion={}, total={})",
            state.route,
            state.past_steps.len(),
            state.messages.len(),
            prompt,
            completion,
            total
        );

        emit(
            &tx,
            TurnEvent::End {
                data: EndData {
                    thread_id,
                    response: state.response,
                    route: state.route,
                    memories: state.memories,
                },
            },
        );
    }
}
