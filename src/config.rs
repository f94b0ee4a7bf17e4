//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRAVEL__*` 覆盖（双下划线表示嵌套，如 `TRAVEL__LLM__PROVIDER=openai`）。
//! API Key 等密钥只从环境变量读取（DEEPSEEK_API_KEY / OPENAI_API_KEY / TAVILY_API_KEY）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::graph::Route;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub search: SearchSection,
    pub memory: MemorySection,
    pub checkpoint: CheckpointSection,
    pub graph: GraphSection,
}

/// [app] 段：应用名、提示词中保留的对话轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 拼 prompt 时带上的最近对话轮数（每轮 user + assistant 两条）；持久化的 messages 不受影响
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: 20,
        }
    }
}

/// [llm] 段：后端选择、温度、重试与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 规划、执行、反思等节点的默认温度
    pub temperature: f32,
    /// 路由分类固定温度，保证同样输入得到同样路由
    pub router_temperature: f32,
    /// 可重试错误（网络、限流、5xx）的最大重试次数
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            temperature: 0.7,
            router_temperature: 0.0,
            max_retries: 2,
            retry_base_delay_ms: 500,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [search] 段：网页搜索（Tavily）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub provider: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    /// basic / advanced
    pub search_depth: String,
    /// 交给摘要模型前的原始结果最大字符数
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            max_results: 5,
            timeout_secs: 30,
            search_depth: "basic".to_string(),
            max_result_chars: 8000,
        }
    }
}

/// [memory] 段：长期记忆（跨会话、按用户隔离）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub enabled: bool,
    /// 每轮检索的记忆条数
    pub top_k: usize,
    /// 如 `sqlite:data/memory.db?mode=rwc`；未设置时使用进程内存储
    pub database_url: Option<String>,
    pub embedding_model: String,
    pub embedding_base_url: Option<String>,
    /// 是否在 memory_save 节点提炼并写入用户事实
    pub save_enabled: bool,
    pub max_saved_per_turn: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 3,
            database_url: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_base_url: None,
            save_enabled: true,
            max_saved_per_turn: 3,
        }
    }
}

/// [checkpoint] 段：会话断点持久化
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CheckpointSection {
    /// 如 `sqlite:data/checkpoints.db?mode=rwc`；未设置时退化为内存检查点（无法跨进程续跑）
    pub database_url: Option<String>,
}

/// [graph] 段：编排图参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    /// 执行 ↔ 反思循环的最大次数，防止死循环
    pub max_reflect_cycles: u32,
    /// 路由结果无效或解析失败时的默认分支
    pub default_route: Route,
    /// 摘要解析失败时，原始搜索结果截取的字符数
    pub summary_fallback_chars: usize,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            max_reflect_cycles: 8,
            default_route: Route::Planner,
            summary_fallback_chars: 500,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRAVEL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRAVEL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRAVEL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.router_temperature, 0.0);
        assert_eq!(cfg.llm.max_retries, 2);
        assert_eq!(cfg.memory.top_k, 3);
        assert_eq!(cfg.graph.default_route, Route::Planner);
        assert!(cfg.checkpoint.database_url.is_none());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[graph]\nmax_reflect_cycles = 3\ndefault_route = \"direct_answer\"\n\n[memory]\ntop_k = 5\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.graph.max_reflect_cycles, 3);
        assert_eq!(cfg.graph.default_route, Route::DirectAnswer);
        assert_eq!(cfg.memory.top_k, 5);
        // 未出现的段保持默认
        assert_eq!(cfg.search.max_results, 5);
    }
}
