//! 七个节点的实现
//!
//! 每个节点持有自己需要的依赖（LLM、搜索、记忆网关）与参数，实现 [`Stage`](crate::graph::Stage)。

pub mod direct_answer;
pub mod executor;
pub mod memory_retrieve;
pub mod memory_save;
pub mod planner;
pub mod reflect;
pub mod router;

pub use direct_answer::DirectAnswerNode;
pub use executor::{ExecutorNode, Summary};
pub use memory_retrieve::MemoryRetrieveNode;
pub use memory_save::{ExtractedMemories, MemorySaveNode};
pub use planner::{Plan, PlannerNode};
pub use reflect::{ReflectNode, ReflectOutput};
pub use router::{RouterNode, RouterOutput};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::graph::structured::{parse_llm_json, schema_json};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::Message;

/// 调用 LLM 并解析为 T；调用失败与解析失败都以错误描述返回，由节点决定回退值
pub(crate) async fn complete_json<T>(
    llm: &dyn LlmClient,
    messages: &[Message],
    temperature: f32,
) -> Result<T, String>
where
    T: DeserializeOwned + JsonSchema,
{
    let options = CompletionOptions::default()
        .with_temperature(temperature)
        .with_schema(schema_json::<T>());
    let text = llm
        .complete(messages, &options)
        .await
        .map_err(|e| format!("llm call failed: {}", e))?;
    parse_llm_json::<T>(&text).map_err(|e| e.to_string())
}

/// 去掉首尾空白并丢弃空项
pub(crate) fn clean_items(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::graph::state::ConversationState;
    use crate::llm::MockLlmClient;

    pub fn mock(texts: &[&str]) -> Arc<MockLlmClient> {
        Arc::new(MockLlmClient::with_texts(texts.iter().map(|s| s.to_string())))
    }

    pub fn state(question: &str) -> ConversationState {
        ConversationState::new(question, "1")
    }
}
