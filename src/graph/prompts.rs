//! 各节点的提示词
//!
//! 每个函数返回发给 LLM 的消息列表；结构化输出节点传入 `format_instructions`（含 JSON Schema）。

use crate::graph::state::PastStep;
use crate::memory::{format_history, Message};

const ROUTER_SYSTEM: &str = "你是旅行助手的意图分类器。判断用户的请求应该如何处理：\n\
- planner：需要查询外部信息（景点、交通、天气、美食、住宿、行程安排等）才能回答；\n\
- direct_answer：寒暄、闲聊、或仅凭常识与对话历史即可回答。\n\
route 字段只能是 planner 或 direct_answer。";

const PLANNER_SYSTEM: &str = "你是一个旅游规划专家。把用户需求拆解为若干可以通过网页搜索完成的具体步骤，\
例如查询天气、查询景点、查询交通。步骤要少而精，不要重复已知历史信息中已经查过的内容。";

const SEARCH_QUERY_SYSTEM: &str =
    "你是一个搜索助手，请把用户的任务转换为最适合搜索引擎搜索的关键词。只输出关键词，不要其他废话。";

const SUMMARY_SYSTEM: &str = "你是一个信息整理助手。根据任务从搜索结果中提炼与任务相关的关键信息，\
保留具体的名称、时间、价格、地址等事实，摘要不超过 300 字。";

const REFLECT_SYSTEM: &str = "你是一个任务调度系统。\n\
当信息足够时，将 next_plan 设为空数组，并在 response 中给出最终 Markdown 回答；\n\
当信息不足时，response 设为空字符串。优先保留当前计划，只在必要时调整。\n\
如需继续执行，next_plan 应尽量等于当前计划中尚未完成的部分；\n\
只有在现有步骤明显错误或缺少关键步骤时才允许修改，并且最多新增 1-2 个步骤。";

const DIRECT_ANSWER_SYSTEM: &str =
    "你是一个友好的旅行助手。结合对话历史与已知的用户信息，直接、简洁地回答用户。";

const MEMORY_EXTRACT_SYSTEM: &str = "你负责维护用户的长期记忆。从本轮对话中提炼值得长期记住的用户事实或偏好，\
例如同行人、预算、饮食禁忌、常住城市、出行偏好。只记录关于用户本人的稳定信息，\
不要记录一次性的问题或 AI 的回答内容；没有值得记住的信息时返回空数组。";

/// 已知用户信息段（无记忆时为空串）
fn memories_section(memories: &[String]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = memories.iter().map(|m| format!("- {}", m)).collect();
    format!("\n\n已知用户信息：\n{}", lines.join("\n"))
}

fn history_section(history: &[Message]) -> String {
    if history.is_empty() {
        return String::new();
    }
    format!("\n\n对话历史：\n{}", format_history(history))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

pub fn router_messages(question: &str, history: &[Message], format_instructions: &str) -> Vec<Message> {
    vec![
        Message::system(format!("{}\n\n{}", ROUTER_SYSTEM, format_instructions)),
        Message::user(format!("用户请求：{}{}", question, history_section(history))),
    ]
}

/// 规划：已执行过的步骤以「步骤 + 结果前 50 字」形式作为已知历史信息
pub fn planner_messages(
    question: &str,
    history: &[Message],
    memories: &[String],
    past_steps: &[PastStep],
    format_instructions: &str,
) -> Vec<Message> {
    let past = if past_steps.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = past_steps
            .iter()
            .map(|s| format!("步骤：{}，结果摘要：{}", s.task, truncate_chars(&s.result, 50)))
            .collect();
        format!("\n\n已知历史信息（不用重复查询）：\n{}", lines.join("\n"))
    };
    vec![
        Message::system(format!("{}\n\n{}", PLANNER_SYSTEM, format_instructions)),
        Message::user(format!(
            "用户需求：{}{}{}{}",
            question,
            memories_section(memories),
            history_section(history),
            past
        )),
    ]
}

pub fn search_query_messages(task: &str) -> Vec<Message> {
    vec![
        Message::system(SEARCH_QUERY_SYSTEM),
        Message::user(format!("任务：{}", task)),
    ]
}

pub fn summary_messages(task: &str, search_results: &str, format_instructions: &str) -> Vec<Message> {
    vec![
        Message::system(format!("{}\n\n{}", SUMMARY_SYSTEM, format_instructions)),
        Message::user(format!("任务：{}\n\n搜索结果：\n{}", task, search_results)),
    ]
}

pub fn reflect_messages(
    question: &str,
    past_steps: &[PastStep],
    plan: &[String],
    format_instructions: &str,
) -> Vec<Message> {
    let mut history = String::new();
    for step in past_steps {
        history.push_str(&format!("已完成步骤：{}\n执行结果：{}\n", step.task, step.result));
    }
    vec![
        Message::system(format!("{}\n\n{}", REFLECT_SYSTEM, format_instructions)),
        Message::user(format!(
            "原始目标：{}\n历史：{}\n当前计划：{}\n",
            question,
            history,
            plan.join("\n")
        )),
    ]
}

pub fn direct_answer_messages(question: &str, history: &[Message], memories: &[String]) -> Vec<Message> {
    vec![
        Message::system(format!(
            "{}{}{}",
            DIRECT_ANSWER_SYSTEM,
            memories_section(memories),
            history_section(history)
        )),
        Message::user(question),
    ]
}

pub fn memory_extract_messages(
    question: &str,
    response: &str,
    known: &[String],
    format_instructions: &str,
) -> Vec<Message> {
    vec![
        Message::system(format!("{}\n\n{}", MEMORY_EXTRACT_SYSTEM, format_instructions)),
        Message::user(format!(
            "用户问题：{}\nAI回答：{}{}",
            question,
            response,
            memories_section(known)
        )),
    ]
}
