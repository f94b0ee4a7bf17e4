//! 助手构建器：按配置组装 LLM、搜索、长期记忆、编排图与 SessionRunner
//!
//! 每个依赖都可以用 with_* 注入（测试或嵌入到其他服务时使用），未注入的按配置创建。

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{Checkpointer, PersistenceCell};
use crate::config::AppConfig;
use crate::core::{EngineError, SessionRunner};
use crate::graph::{GraphSettings, OrchestrationGraph};
use crate::llm::{
    create_deepseek_client, create_embedder_from_config, LlmClient, MockLlmClient, OpenAiClient,
    RetryConfig, RetryingLlmClient,
};
use crate::memory::{InMemoryMemory, MemoryGateway, NoopMemory, SqliteMemoryStore};
use crate::tools::{TavilySearch, WebSearch};

/// 按配置创建 LLM 客户端：DeepSeek / OpenAI 兼容端点，无 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);

    if provider == "deepseek" && (has_deepseek_key || openai_key.is_some()) {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(
            create_deepseek_client(Some(&cfg.llm.model), cfg.llm.base_url.as_deref())
                .with_temperature(cfg.llm.temperature)
                .with_request_timeout(timeout),
        )
    } else if let Some(key) = openai_key.filter(|_| provider != "deepseek") {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                .with_temperature(cfg.llm.temperature)
                .with_request_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

pub struct AssistantBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    search: Option<Arc<dyn WebSearch>>,
    memory: Option<Arc<dyn MemoryGateway>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl AssistantBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            search: None,
            memory: None,
            checkpointer: None,
        }
    }

    /// 注入 LLM（不再包一层重试）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryGateway>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// 注入断点存储（跳过延迟初始化）
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按配置创建 LLM，并包上重试
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let retry = RetryConfig {
            max_retries: self.config.llm.max_retries,
            base_delay: Duration::from_millis(self.config.llm.retry_base_delay_ms),
            ..RetryConfig::default()
        };
        Arc::new(RetryingLlmClient::new(create_llm_from_config(&self.config), retry))
    }

    pub fn build_search(&self) -> Arc<dyn WebSearch> {
        let search = TavilySearch::from_config(&self.config.search);
        if !search.has_api_key() {
            tracing::warn!("TAVILY_API_KEY not set, web search will fail");
        }
        Arc::new(search)
    }

    /// 长期记忆：未启用 → Noop；配置了数据库 → SQLite（连接失败退回进程内）；否则进程内
    pub async fn build_memory(&self) -> Arc<dyn MemoryGateway> {
        let cfg = &self.config.memory;
        if !cfg.enabled {
            return Arc::new(NoopMemory);
        }
        let embedder = create_embedder_from_config(cfg.embedding_base_url.as_deref(), &cfg.embedding_model);
        if let Some(url) = cfg.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            match SqliteMemoryStore::connect(url, embedder.clone()).await {
                Ok(store) => {
                    tracing::info!("long-term memory store ready");
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::warn!("memory database unavailable, using in-process store: {}", e);
                }
            }
        }
        Arc::new(InMemoryMemory::new(embedder))
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.config.graph.max_reflect_cycles == 0 {
            return Err(EngineError::Config("graph.max_reflect_cycles must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.config.llm.router_temperature) {
            return Err(EngineError::Config(format!(
                "llm.router_temperature out of range: {}",
                self.config.llm.router_temperature
            )));
        }
        Ok(())
    }

    pub async fn build(self) -> Result<SessionRunner, EngineError> {
        self.validate()?;

        let llm = match &self.llm {
            Some(llm) => llm.clone(),
            None => self.build_llm(),
        };
        let search = match &self.search {
            Some(search) => search.clone(),
            None => self.build_search(),
        };
        let memory = match &self.memory {
            Some(memory) => memory.clone(),
            None => self.build_memory().await,
        };
        let persistence = match &self.checkpointer {
            Some(checkpointer) => PersistenceCell::ready(checkpointer.clone()),
            None => PersistenceCell::new(self.config.checkpoint.database_url.clone()),
        };

        let graph = OrchestrationGraph::new(
            llm.clone(),
            search,
            memory,
            GraphSettings::from_config(&self.config),
        );
        Ok(SessionRunner::new(graph, persistence, llm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::PersistenceMode;

    #[tokio::test]
    async fn test_rejects_zero_reflect_cycles() {
        let mut cfg = AppConfig::default();
        cfg.graph.max_reflect_cycles = 0;
        let result = AssistantBuilder::new(cfg)
            .with_llm(Arc::new(MockLlmClient::new()))
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_disabled_memory_is_noop() {
        let mut cfg = AppConfig::default();
        cfg.memory.enabled = false;
        let memory = AssistantBuilder::new(cfg).build_memory().await;
        assert!(!memory.enabled());
    }

    #[tokio::test]
    async fn test_default_build_is_in_memory() {
        let runner = AssistantBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .build()
            .await
            .unwrap();
        assert_eq!(runner.persistence_mode().await, PersistenceMode::InMemory);
    }
}
