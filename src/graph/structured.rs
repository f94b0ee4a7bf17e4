//! 结构化输出：从 LLM 文本中提取 JSON 并反序列化
//!
//! 解析结果显式区分 Parsed 与 Fallback，节点据此在事件中标记 `"fallback": true`。

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("No JSON object found in output")]
    NoJson,

    #[error("Invalid JSON: {0}")]
    Invalid(String),
}

/// 结构化解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum Structured<T> {
    Parsed(T),
    /// 解析或调用失败，使用固定回退值
    Fallback { value: T, reason: String },
}

impl<T> Structured<T> {
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>, fallback: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Structured::Parsed(value),
            Err(e) => Structured::Fallback {
                value: fallback(),
                reason: e.to_string(),
            },
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self, Structured::Fallback { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            Structured::Parsed(v) => v,
            Structured::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Structured::Parsed(v) => v,
            Structured::Fallback { value, .. } => value,
        }
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// 提取 JSON 文本：优先 ```json 代码块，否则取最外层 {…}
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(caps) = fence_regex().and_then(|re| re.captures(trimmed)) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub fn parse_llm_json<T: DeserializeOwned>(output: &str) -> Result<T, ParseError> {
    let json = extract_json_block(output).ok_or(ParseError::NoJson)?;
    serde_json::from_str(json).map_err(|e| ParseError::Invalid(format!("{}: {}", e, json)))
}

/// 期望输出的 JSON Schema（嵌入 prompt，并随 CompletionOptions 传给后端）
pub fn schema_json<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default()
}

/// 追加在 prompt 末尾的输出格式说明
pub fn format_instructions<T: JsonSchema>() -> String {
    let schema = serde_json::to_string_pretty(&schema_json::<T>()).unwrap_or_default();
    format!(
        "请只输出一个符合以下 JSON Schema 的 JSON 对象，不要输出其他内容：\n```json\n{}\n```",
        schema
    )
}
