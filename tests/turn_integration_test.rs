//! 整轮对话集成测试：Mock LLM + Mock 搜索，覆盖规划、直接回答、搜索失败、多轮续接与断点续跑

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use travel_assistant::checkpoint::{
        Checkpoint, Checkpointer, Cursor, InMemoryCheckpointer, PersistenceError, PersistenceMode,
    };
    use travel_assistant::config::AppConfig;
    use travel_assistant::graph::{ConversationState, EndData, Route, StageId, TurnEvent};
    use travel_assistant::llm::{HashingEmbedder, MockLlmClient, MockReply};
    use travel_assistant::memory::{InMemoryMemory, MemoryGateway, NoopMemory};
    use travel_assistant::tools::{MockSearch, SearchError};
    use travel_assistant::{AssistantBuilder, SessionRunner, TurnStream};

    /// 记录每次保存的 (past_steps 长度, messages 长度)
    #[derive(Default)]
    struct RecordingCheckpointer {
        inner: InMemoryCheckpointer,
        lengths: Mutex<Vec<(usize, usize)>>,
    }

    #[async_trait]
    impl Checkpointer for RecordingCheckpointer {
        async fn save(
            &self,
            thread_id: &str,
            state: &ConversationState,
            cursor: Cursor,
        ) -> Result<u64, PersistenceError> {
            self.lengths
                .lock()
                .unwrap()
                .push((state.past_steps.len(), state.messages.len()));
            self.inner.save(thread_id, state, cursor).await
        }

        async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
            self.inner.load(thread_id).await
        }

        fn mode(&self) -> PersistenceMode {
            PersistenceMode::InMemory
        }
    }

    /// 第 fail_at 次保存失败一次，其余正常
    struct FlakyCheckpointer {
        inner: InMemoryCheckpointer,
        saves: AtomicUsize,
        fail_at: usize,
    }

    #[async_trait]
    impl Checkpointer for FlakyCheckpointer {
        async fn save(
            &self,
            thread_id: &str,
            state: &ConversationState,
            cursor: Cursor,
        ) -> Result<u64, PersistenceError> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_at {
                return Err(PersistenceError::Storage("disk full".into()));
            }
            self.inner.save(thread_id, state, cursor).await
        }

        async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
            self.inner.load(thread_id).await
        }

        fn mode(&self) -> PersistenceMode {
            PersistenceMode::InMemory
        }
    }

    async fn runner(
        cfg: AppConfig,
        llm: Arc<MockLlmClient>,
        search: Arc<MockSearch>,
        memory: Arc<dyn MemoryGateway>,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> SessionRunner {
        AssistantBuilder::new(cfg)
            .with_llm(llm)
            .with_search(search)
            .with_memory(memory)
            .with_checkpointer(checkpointer)
            .build()
            .await
            .unwrap()
    }

    async fn simple_runner(llm: Arc<MockLlmClient>, search: Arc<MockSearch>) -> SessionRunner {
        runner(
            AppConfig::default(),
            llm,
            search,
            Arc::new(NoopMemory),
            Arc::new(InMemoryCheckpointer::new()),
        )
        .await
    }

    async fn collect(stream: TurnStream) -> Vec<TurnEvent> {
        stream.collect().await
    }

    fn nodes(events: &[TurnEvent]) -> Vec<StageId> {
        events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Node { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }

    fn end(events: &[TurnEvent]) -> EndData {
        match events.last() {
            Some(TurnEvent::End { data }) => data.clone(),
            other => panic!("turn did not end with an end event: {:?}", other),
        }
    }

    fn planner_turn_replies() -> Vec<&'static str> {
        vec![
            r#"{"route": "planner"}"#,
            r#"{"steps": ["查询故宫开放时间", "查询北京特色美食"]}"#,
            "故宫 开放时间",
            r#"{"summary": "故宫 8:30 开门，周一闭馆"}"#,
            r#"{"response": "", "next_plan": ["查询北京特色美食"]}"#,
            "北京 特色美食",
            r#"{"summary": "烤鸭、炸酱面"}"#,
            r#"{"response": "上午逛故宫，晚上吃烤鸭", "next_plan": []}"#,
        ]
    }

    #[tokio::test]
    async fn test_planner_turn_reaches_final_answer() {
        let llm = Arc::new(MockLlmClient::with_texts(planner_turn_replies()));
        let search = Arc::new(MockSearch::new());
        let runner = simple_runner(llm.clone(), search.clone()).await;

        let events = collect(runner.submit("t-a", "1", "我想逛北京一天")).await;

        assert_eq!(
            nodes(&events),
            vec![
                StageId::MemoryRetrieve,
                StageId::Router,
                StageId::Planner,
                StageId::Executor,
                StageId::Reflect,
                StageId::Executor,
                StageId::Reflect,
                StageId::MemorySave,
            ]
        );
        let data = end(&events);
        assert_eq!(data.response, "上午逛故宫，晚上吃烤鸭");
        assert_eq!(data.route, Some(Route::Planner));
        assert!(data.memories.is_empty());
        assert_eq!(search.queries(), vec!["故宫 开放时间", "北京 特色美食"]);
        assert_eq!(llm.remaining(), 0);

        let chunks: Vec<_> = events.iter().filter(|e| e.kind() == "chunk").collect();
        assert_eq!(chunks.len(), 1);

        let snapshot = runner.snapshot("t-a").await.unwrap().unwrap();
        assert_eq!(snapshot.state.messages.len(), 2);
        assert_eq!(snapshot.state.past_steps.len(), 2);
        assert!(snapshot.state.plan.is_empty());
        assert!(snapshot.cursor.is_terminal());
    }

    #[tokio::test]
    async fn test_direct_answer_turn() {
        let llm = Arc::new(MockLlmClient::with_texts([r#"{"route": "direct_answer"}"#, "你好！想去哪里旅行？"]));
        let runner = simple_runner(llm, Arc::new(MockSearch::new())).await;

        let events = collect(runner.submit("t-b", "1", "你好")).await;
        assert_eq!(
            nodes(&events),
            vec![StageId::MemoryRetrieve, StageId::Router, StageId::DirectAnswer, StageId::MemorySave]
        );
        assert_eq!(end(&events).response, "你好！想去哪里旅行？");

        let state = runner.snapshot("t-b").await.unwrap().unwrap().state;
        assert_eq!(state.messages.len(), 2);
        assert!(state.plan.is_empty());
    }

    #[tokio::test]
    async fn test_search_failure_ends_turn_without_reflect() {
        let llm = Arc::new(MockLlmClient::with_texts([
            r#"{"route": "planner"}"#,
            r#"{"steps": ["查询故宫开放时间"]}"#,
            "故宫 开放时间",
        ]));
        let search = Arc::new(MockSearch::with_results(vec![Err(SearchError::Api {
            status: 432,
            message: "quota exceeded".into(),
        })]));
        let runner = simple_runner(llm, search).await;

        let events = collect(runner.submit("t-c", "1", "我想逛北京一天")).await;
        let stages = nodes(&events);
        assert_eq!(stages.last(), Some(&StageId::Executor));
        assert!(!stages.contains(&StageId::Reflect));
        assert!(!stages.contains(&StageId::MemorySave));

        let data = end(&events);
        assert_eq!(data.response, "搜索失败：Search API error 432: quota exceeded");
        assert!(events.iter().any(|e| matches!(e, TurnEvent::Chunk { data } if data.response.starts_with("搜索失败："))));
    }

    #[tokio::test]
    async fn test_second_turn_hydrates_history_and_recomputes_memories() {
        let memory = Arc::new(InMemoryMemory::new(Arc::new(HashingEmbedder::default())));
        let llm = Arc::new(MockLlmClient::with_texts([
            r#"{"route": "direct_answer"}"#,
            "好的，记住了你喜欢烤鸭",
            r#"{"memories": ["用户喜欢吃烤鸭"]}"#,
            r#"{"route": "direct_answer"}"#,
            "推荐全聚德",
            r#"{"memories": []}"#,
        ]));
        let runner = runner(
            AppConfig::default(),
            llm.clone(),
            Arc::new(MockSearch::new()),
            memory.clone(),
            Arc::new(InMemoryCheckpointer::new()),
        )
        .await;

        let first = collect(runner.submit("t-d", "7", "我喜欢吃烤鸭")).await;
        assert!(end(&first).memories.is_empty());

        let second = collect(runner.submit("t-d", "7", "晚饭去哪吃")).await;
        let data = end(&second);
        assert_eq!(data.response, "推荐全聚德");
        assert_eq!(data.memories, vec!["用户喜欢吃烤鸭".to_string()]);

        let state = runner.snapshot("t-d").await.unwrap().unwrap().state;
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.question, "晚饭去哪吃");

        // 第二轮的直接回答看得到第一轮的对话
        let direct_prompt = llm.calls()[4].prompt_text();
        assert!(direct_prompt.contains("user: 我喜欢吃烤鸭"));
        assert!(direct_prompt.contains("用户喜欢吃烤鸭"));
        assert_eq!(memory.records_for("7").len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_monotonic_across_turns() {
        let mut replies = planner_turn_replies();
        replies.push(r#"{"route": "direct_answer"}"#);
        replies.push("不客气");
        let llm = Arc::new(MockLlmClient::with_texts(replies));
        let checkpointer = Arc::new(RecordingCheckpointer::default());
        let runner = runner(
            AppConfig::default(),
            llm,
            Arc::new(MockSearch::new()),
            Arc::new(NoopMemory),
            checkpointer.clone(),
        )
        .await;

        collect(runner.submit("t-m", "1", "我想逛北京一天")).await;
        collect(runner.submit("t-m", "1", "谢谢")).await;

        let lengths = checkpointer.lengths.lock().unwrap().clone();
        assert!(lengths.len() > 10);
        for pair in lengths.windows(2) {
            assert!(pair[1].0 >= pair[0].0, "past_steps shrank: {:?}", lengths);
            assert!(pair[1].1 >= pair[0].1, "messages shrank: {:?}", lengths);
        }
        assert_eq!(lengths.last(), Some(&(2, 4)));
    }

    #[tokio::test]
    async fn test_reflect_loop_terminates_at_cap() {
        let llm = Arc::new(MockLlmClient::with_texts([
            r#"{"route": "planner"}"#,
            r#"{"steps": ["查询"]}"#,
        ]));
        for _ in 0..20 {
            llm.push(MockReply::Ok("关键词".into()));
            llm.push(MockReply::Ok(r#"{"summary": "没有新信息"}"#.into()));
            llm.push(MockReply::Ok(r#"{"response": "", "next_plan": ["再查一次"]}"#.into()));
        }
        let mut cfg = AppConfig::default();
        cfg.graph.max_reflect_cycles = 4;
        let runner = runner(
            cfg,
            llm,
            Arc::new(MockSearch::new()),
            Arc::new(NoopMemory),
            Arc::new(InMemoryCheckpointer::new()),
        )
        .await;

        let events = collect(runner.submit("t-cap", "1", "我想逛北京一天")).await;
        let reflects = nodes(&events).iter().filter(|s| **s == StageId::Reflect).count();
        assert_eq!(reflects, 4);
        assert!(end(&events).response.is_empty());

        let snapshot = runner.snapshot("t-cap").await.unwrap().unwrap();
        assert!(snapshot.state.plan.is_empty());
        assert_eq!(snapshot.cursor.cycles, 4);
    }

    #[tokio::test]
    async fn test_repeated_empty_reflect_does_not_livelock() {
        let llm = Arc::new(MockLlmClient::with_texts([
            r#"{"route": "planner"}"#,
            r#"{"steps": ["查询"]}"#,
            "关键词",
            r#"{"summary": "无"}"#,
            r#"{"response": "", "next_plan": []}"#,
        ]));
        let runner = simple_runner(llm, Arc::new(MockSearch::new())).await;

        let events = collect(runner.submit("t-empty", "1", "q")).await;
        let reflect = events.iter().find_map(|e| match e {
            TurnEvent::Node { node: StageId::Reflect, data } => Some(data.clone()),
            _ => None,
        });
        assert_eq!(reflect.unwrap()["decision"], "stalled");
        assert!(end(&events).response.is_empty());
    }

    #[tokio::test]
    async fn test_routing_is_deterministic() {
        let reply = r#"{"route": "direct_answer"}"#;
        let llm = Arc::new(MockLlmClient::with_texts([reply, "a", reply, "b"]));
        let runner = simple_runner(llm.clone(), Arc::new(MockSearch::new())).await;

        let first = end(&collect(runner.submit("t-r1", "1", "你好")).await);
        let second = end(&collect(runner.submit("t-r2", "1", "你好")).await);
        assert_eq!(first.route, second.route);
        assert_eq!(first.route, Some(Route::DirectAnswer));

        let router_temps: Vec<_> = [0, 2].iter().map(|i| llm.calls()[*i].options.temperature).collect();
        assert_eq!(router_temps, vec![Some(0.0), Some(0.0)]);
    }

    #[tokio::test]
    async fn test_resume_is_idempotent_without_steps() {
        let checkpointer = Arc::new(InMemoryCheckpointer::new());
        let llm = Arc::new(MockLlmClient::with_texts([r#"{"route": "direct_answer"}"#, "你好！"]));
        let runner = runner(
            AppConfig::default(),
            llm,
            Arc::new(MockSearch::new()),
            Arc::new(NoopMemory),
            checkpointer.clone(),
        )
        .await;
        collect(runner.submit("t-i", "1", "你好")).await;

        let before = checkpointer.load("t-i").await.unwrap().unwrap();
        let version = checkpointer.save("t-i", &before.state, before.cursor).await.unwrap();
        let after = checkpointer.load("t-i").await.unwrap().unwrap();

        assert_eq!(version, before.version + 1);
        assert_eq!(after.state, before.state);
        assert_eq!(after.cursor, before.cursor);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_fatal_then_resumable() {
        // 第 3 次保存（router 之后）失败
        let checkpointer = Arc::new(FlakyCheckpointer {
            inner: InMemoryCheckpointer::new(),
            saves: AtomicUsize::new(0),
            fail_at: 3,
        });
        let llm = Arc::new(MockLlmClient::with_texts([
            r#"{"route": "direct_answer"}"#,
            r#"{"route": "direct_answer"}"#,
            "你好！",
        ]));
        let runner = runner(
            AppConfig::default(),
            llm,
            Arc::new(MockSearch::new()),
            Arc::new(NoopMemory),
            checkpointer,
        )
        .await;

        let events = collect(runner.submit("t-p", "1", "你好")).await;
        assert_eq!(nodes(&events), vec![StageId::MemoryRetrieve, StageId::Router]);
        match events.last() {
            Some(TurnEvent::Error { data }) => assert_eq!(data.kind, "persistence"),
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(!events.iter().any(|e| e.kind() == "end"));

        let snapshot = runner.snapshot("t-p").await.unwrap().unwrap();
        assert_eq!(snapshot.cursor.next, Some(StageId::Router));

        let resumed = collect(runner.resume("t-p").await.unwrap().unwrap()).await;
        assert_eq!(
            nodes(&resumed),
            vec![StageId::Router, StageId::DirectAnswer, StageId::MemorySave]
        );
        assert_eq!(end(&resumed).response, "你好！");
        assert!(runner.resume("t-p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resumed_turn_recalls_memories() {
        let memory = Arc::new(InMemoryMemory::new(Arc::new(HashingEmbedder::default())));
        memory.add("7", "用户喜欢吃烤鸭").await.unwrap();
        let checkpointer = Arc::new(FlakyCheckpointer {
            inner: InMemoryCheckpointer::new(),
            saves: AtomicUsize::new(0),
            fail_at: 3,
        });
        let llm = Arc::new(MockLlmClient::with_texts([
            r#"{"route": "direct_answer"}"#,
            r#"{"route": "direct_answer"}"#,
            "推荐全聚德",
            r#"{"memories": ["用户喜欢吃烤鸭"]}"#,
        ]));
        let runner = runner(
            AppConfig::default(),
            llm.clone(),
            Arc::new(MockSearch::new()),
            memory.clone(),
            checkpointer,
        )
        .await;

        let first = collect(runner.submit("t-rm", "7", "晚饭去哪吃")).await;
        assert_eq!(first.last().map(|e| e.kind()), Some("error"));

        let resumed = collect(runner.resume("t-rm").await.unwrap().unwrap()).await;
        assert_eq!(nodes(&resumed)[0], StageId::Router);
        let data = end(&resumed);
        assert_eq!(data.response, "推荐全聚德");
        assert_eq!(data.memories, vec!["用户喜欢吃烤鸭".to_string()]);

        let calls = llm.calls();
        assert!(calls[2].prompt_text().contains("用户喜欢吃烤鸭"));
        assert_eq!(llm.remaining(), 0);
        // 已召回的记忆不会被重复写入
        assert_eq!(memory.records_for("7").len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_checkpoints_survive_runner_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.checkpoint.database_url = Some(format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("checkpoints.db").display()
        ));
        cfg.memory.enabled = false;

        let build = |texts: [&'static str; 2]| {
            let cfg = cfg.clone();
            async move {
                AssistantBuilder::new(cfg)
                    .with_llm(Arc::new(MockLlmClient::with_texts(texts)))
                    .with_search(Arc::new(MockSearch::new()))
                    .build()
                    .await
                    .unwrap()
            }
        };

        let first = build([r#"{"route": "direct_answer"}"#, "你好！"]).await;
        assert_eq!(first.persistence_mode().await, PersistenceMode::Durable);
        collect(first.submit("t-s", "1", "你好")).await;
        drop(first);

        let second = build([r#"{"route": "direct_answer"}"#, "再见！"]).await;
        let events = collect(second.submit("t-s", "1", "再见")).await;
        assert_eq!(end(&events).response, "再见！");

        let snapshot = second.snapshot("t-s").await.unwrap().unwrap();
        assert_eq!(snapshot.state.messages.len(), 4);
        assert!(snapshot.version > 1);
    }
}
