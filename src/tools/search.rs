//! 网页搜索：Tavily Search API
//!
//! POST https://api.tavily.com/search，返回 `results` 数组（title / url / content）。
//! API Key 只从环境变量 TAVILY_API_KEY 读取。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::SearchSection;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("TAVILY_API_KEY not set")]
    MissingApiKey,

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Search API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// 网页搜索抽象：一次查询返回原始结果（JSON）
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Value, SearchError>;
}

/// Tavily 搜索客户端
pub struct TavilySearch {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    max_results: usize,
    search_depth: String,
}

impl TavilySearch {
    pub fn new(api_key: Option<String>, max_results: usize, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: TAVILY_SEARCH_URL.to_string(),
            max_results,
            search_depth: "basic".to_string(),
        }
    }

    /// 从 [search] 配置段与环境变量 TAVILY_API_KEY 创建
    pub fn from_config(cfg: &SearchSection) -> Self {
        Self::new(
            std::env::var("TAVILY_API_KEY").ok(),
            cfg.max_results,
            cfg.timeout_secs,
        )
        .with_search_depth(&cfg.search_depth)
    }

    pub fn with_search_depth(mut self, depth: &str) -> Self {
        self.search_depth = depth.to_string();
        self
    }

    /// 自定义接口地址（代理或测试）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn request_body(&self, api_key: &str, query: &str) -> Value {
        json!({
            "api_key": api_key,
            "query": query,
            "max_results": self.max_results,
            "search_depth": self.search_depth,
            "include_answer": false,
            "include_raw_content": false,
            "include_images": false,
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> Result<Value, SearchError> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::MissingApiKey)?;
        tracing::debug!("tavily search: {}", query);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(api_key, query))
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;
        Ok(body.get("results").cloned().unwrap_or_else(|| json!([])))
    }
}

/// 测试用搜索：按顺序返回预置结果，并记录收到的查询
#[derive(Default)]
pub struct MockSearch {
    replies: Mutex<VecDeque<Result<Value, SearchError>>>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(results: Vec<Result<Value, SearchError>>) -> Self {
        Self {
            replies: Mutex::new(results.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Result<Value, SearchError>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// 已收到的查询（按调用顺序）
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WebSearch for MockSearch {
    async fn search(&self, query: &str) -> Result<Value, SearchError> {
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        // 预置结果用完后返回一条通用结果
        next.unwrap_or_else(|| {
            Ok(json!([{
                "title": "Mock result",
                "url": "https://example.com",
                "content": format!("Mock content for {}", query),
            }]))
        })
    }
}

/// 将原始结果序列化为文本，超过 max_chars 时截断
pub fn render_results(results: &Value, max_chars: usize) -> String {
    let text = match results {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}
