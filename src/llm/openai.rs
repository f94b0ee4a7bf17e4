//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 调用方带上 JSON Schema 时开启 json_object 输出模式，schema 本身已写在 prompt 里。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 进程内累计的 token 用量（所有 thread 共享一个客户端）
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl TokenUsage {
    pub fn record(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let prompt = self.prompt.load(Ordering::Relaxed);
        let completion = self.completion.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名、默认温度与请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    default_temperature: f32,
    request_timeout: Duration,
    usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            default_temperature: 0.7,
            request_timeout: Duration::from_secs(60),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .temperature(options.temperature.unwrap_or(self.default_temperature))
            .messages(self.to_openai_messages(messages)?);
        if options.json_schema.is_some() {
            args.response_format(ResponseFormat::JsonObject);
        }
        args.build()
    }
}

/// 按 API 返回的错误类型分类；无法识别的类型按传输错误处理（可重试）
fn classify_api_error(kind: Option<&str>, message: String) -> LlmError {
    let kind = kind.unwrap_or_default().to_lowercase();
    if kind.contains("rate_limit") || message.to_lowercase().contains("rate limit") {
        return LlmError::RateLimited { retry_after_ms: 1000 };
    }
    let status = match kind.as_str() {
        "invalid_request_error" => 400,
        "authentication_error" => 401,
        "permission_error" | "insufficient_quota" => 403,
        "not_found_error" => 404,
        "server_error" | "api_error" => 500,
        "overloaded_error" => 503,
        _ => return LlmError::Transport(message),
    };
    LlmError::Api { status, message }
}

fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => classify_api_error(api.r#type.as_deref(), api.message),
        other => LlmError::Transport(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.snapshot()
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let request = self.build_request(messages, options).map_err(map_openai_error)?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout))?
            .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .record(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::default();
        usage.record(10, 5);
        usage.record(3, 2);
        assert_eq!(usage.snapshot(), (13, 7, 20));
    }

    #[test]
    fn test_json_mode_only_with_schema() {
        let client = OpenAiClient::new(None, "deepseek-chat", Some("sk-test"));
        let msgs = [Message::user("q")];

        let plain = client.build_request(&msgs, &CompletionOptions::default()).unwrap();
        assert!(plain.response_format.is_none());

        let opts = CompletionOptions::default()
            .with_temperature(0.0)
            .with_schema(serde_json::json!({"type": "object"}));
        let structured = client.build_request(&msgs, &opts).unwrap();
        assert!(matches!(structured.response_format, Some(ResponseFormat::JsonObject)));
        assert_eq!(structured.temperature, Some(0.0));
    }

    #[test]
    fn test_api_error_classes() {
        let invalid = classify_api_error(Some("invalid_request_error"), "bad model".into());
        assert!(matches!(invalid, LlmError::Api { status: 400, .. }));
        assert!(!invalid.is_retryable());

        let server = classify_api_error(Some("server_error"), "boom".into());
        assert!(matches!(server, LlmError::Api { status: 500, .. }));
        assert!(server.is_retryable());

        let limited = classify_api_error(Some("rate_limit_exceeded"), "slow down".into());
        assert!(matches!(limited, LlmError::RateLimited { .. }));

        let unknown = classify_api_error(None, "upstream hiccup".into());
        assert!(matches!(unknown, LlmError::Transport(_)));
        assert!(unknown.is_retryable());
    }

    #[test]
    fn test_non_api_error_is_transport() {
        let err = map_openai_error(OpenAIError::InvalidArgument("bad".into()));
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
