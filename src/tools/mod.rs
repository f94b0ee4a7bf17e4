//! 工具层：执行节点调用的外部能力（网页搜索）

pub mod search;

pub use search::{render_results, MockSearch, SearchError, TavilySearch, WebSearch};
