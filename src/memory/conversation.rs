//! 短期记忆：对话历史
//!
//! 会话状态中的 messages 只追加、跨轮次保留；拼 prompt 时只取最近 N 轮（history_window）。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 取最近 max_turns 轮（max_turns*2 条）消息
pub fn history_window(messages: &[Message], max_turns: usize) -> &[Message] {
    let keep = max_turns.saturating_mul(2);
    if messages.len() > keep {
        &messages[messages.len() - keep..]
    } else {
        messages
    }
}

/// 格式化为 "role: content" 多行文本，供 prompt 使用
pub fn format_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_window_keeps_latest_turns() {
        let messages: Vec<Message> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{}", i / 2))
                } else {
                    Message::assistant(format!("a{}", i / 2))
                }
            })
            .collect();

        let window = history_window(&messages, 2);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "q3");
        assert_eq!(history_window(&messages, 20).len(), 10);
    }

    #[test]
    fn test_format_history() {
        let messages = vec![Message::user("你好"), Message::assistant("你好！")];
        assert_eq!(format_history(&messages), "user: 你好\nassistant: 你好！");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
