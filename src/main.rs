//! 旅行规划助手命令行
//!
//! 带问题参数时跑一轮后退出；不带时逐行读取 stdin，同一 thread 内多轮对话。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use travel_assistant::config::{load_config, AppConfig};
use travel_assistant::core::{AssistantBuilder, SessionRunner, TurnStream};
use travel_assistant::graph::TurnEvent;
use travel_assistant::observability;

#[derive(Parser, Debug)]
#[command(name = "travel-assistant", version, about = "旅行规划助手：规划 / 搜索 / 反思")]
struct Cli {
    /// 配置文件路径（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 会话 ID；同一 ID 的多次运行共享对话历史（需配置 checkpoint.database_url）
    #[arg(short, long)]
    thread: Option<String>,

    /// 用户 ID（长期记忆按用户隔离）
    #[arg(short, long, default_value = "1")]
    user: String,

    /// 以 JSON 行输出原始事件
    #[arg(long)]
    json: bool,

    /// 继续该会话中未完成的一轮
    #[arg(long)]
    resume: bool,

    /// 日志使用 JSON 格式
    #[arg(long)]
    log_json: bool,

    /// 问题；省略时进入交互模式
    question: Option<String>,
}

async fn print_turn(mut stream: TurnStream, json: bool) -> anyhow::Result<()> {
    while let Some(event) = stream.next().await {
        if json {
            println!("{}", serde_json::to_string(&event).context("serialize event")?);
            continue;
        }
        match event {
            TurnEvent::Node { node, data } => {
                if data.get("fallback").and_then(|v| v.as_bool()).unwrap_or(false) {
                    eprintln!("· {} (fallback)", node);
                } else {
                    eprintln!("· {}", node);
                }
            }
            TurnEvent::Chunk { data } => println!("\n{}\n", data.response),
            TurnEvent::End { data } => {
                if data.response.trim().is_empty() {
                    println!("（本轮没有得到回答，请换个说法再试）");
                }
            }
            TurnEvent::Error { data } => {
                eprintln!("error ({}): {}", data.kind, data.message);
            }
        }
    }
    Ok(())
}

async fn repl(runner: &SessionRunner, thread_id: &str, user_id: &str, json: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("thread: {}（输入问题，空行或 Ctrl-D 退出）", thread_id);
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let question = line.trim();
        if question.is_empty() {
            break;
        }
        print_turn(runner.submit(thread_id, user_id, question), json).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.log_json {
        observability::init_json();
    } else {
        observability::init();
    }

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let runner = AssistantBuilder::new(cfg)
        .build()
        .await
        .context("Failed to build assistant")?;

    let thread_id = cli
        .thread
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if cli.resume {
        match runner.resume(&thread_id).await.context("resume")? {
            Some(stream) => print_turn(stream, cli.json).await?,
            None => eprintln!("thread {} 没有未完成的一轮", thread_id),
        }
        return Ok(());
    }

    match cli.question.as_deref() {
        Some(question) => print_turn(runner.submit(&thread_id, &cli.user, question), cli.json).await,
        None => repl(&runner, &thread_id, &cli.user, cli.json).await,
    }
}
