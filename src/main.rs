//! codescout 命令行入口
//!
//! 针对本地仓库回答一个问题：打印实时进度与最终回答；配置 db_path 后缓存跨进程保留。
//! Ctrl+C 请求取消当前研究，在下一个检查点生效。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use codescout::agent::StrategyChoice;
use codescout::config::{load_config, AppConfig};
use codescout::core::TaskEvent;
use codescout::{Orchestrator, ResearchBuilder, ResearchOutcome, ResearchRequest};

#[derive(Parser, Debug)]
#[command(name = "codescout", version, about = "Answer questions about a source repository")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 被研究的仓库根目录（默认取配置或当前目录）
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// 查询记录 SQLite 路径
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 提出一个研究问题
    Ask {
        prompt: String,

        /// 冲突域（默认是仓库路径）
        #[arg(long)]
        domain: Option<String>,

        /// 策略：auto / single_pass / multi_stage
        #[arg(long, default_value = "auto")]
        strategy: String,

        /// 跳过缓存
        #[arg(long)]
        force: bool,

        /// 以 JSON 输出事件与结果
        #[arg(long)]
        json: bool,
    },
    /// 最近的查询记录
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codescout::observability::init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    if let Some(db) = &cli.db {
        config.app.db_path = Some(db.clone());
    }
    let repo_root = cli
        .repo
        .clone()
        .or_else(|| config.app.repo_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let repo_root = repo_root
        .canonicalize()
        .with_context(|| format!("Repository not found: {}", repo_root.display()))?;

    let orchestrator = Arc::new(
        ResearchBuilder::new(config)
            .with_repo_root(&repo_root)
            .build()
            .context("Failed to build research orchestrator")?,
    );

    match cli.command {
        Command::Ask {
            prompt,
            domain,
            strategy,
            force,
            json,
        } => {
            let domain = domain.unwrap_or_else(|| repo_root.display().to_string());
            let strategy: StrategyChoice = strategy.parse()?;
            let request = ResearchRequest::new(prompt, domain)
                .with_force(force)
                .with_strategy(strategy);
            ask(orchestrator, request, json).await
        }
        Command::History { limit } => {
            for q in orchestrator.history(limit).await? {
                println!(
                    "{}  {:<9}  {}  {}",
                    q.created_at.format("%Y-%m-%d %H:%M:%S"),
                    q.status.as_str(),
                    q.id,
                    q.prompt
                );
            }
            Ok(())
        }
    }
}

async fn ask(orchestrator: Arc<Orchestrator>, request: ResearchRequest, json: bool) -> anyhow::Result<()> {
    let outcome = orchestrator.submit(request).await?;

    let task_id = match &outcome {
        ResearchOutcome::Cached(hit) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                eprintln!(
                    "[cache] answered from {} (similarity {:.2})",
                    hit.source_query_id, hit.score
                );
                println!("{}", hit.answer);
            }
            return Ok(());
        }
        ResearchOutcome::Started { task_id, query_id, strategy } => {
            if !json {
                eprintln!("[start] query {} ({})", query_id, strategy);
            }
            task_id.clone()
        }
    };

    let mut events = orchestrator.subscribe(&task_id).await?;

    {
        let orchestrator = Arc::clone(&orchestrator);
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("[cancel] stopping at the next checkpoint...");
                orchestrator.cancel(&task_id).await;
            }
        });
    }

    while let Some(event) = events.next().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match event {
            TaskEvent::Phase { name } => eprintln!("[phase] {}", name),
            TaskEvent::Progress {
                iteration,
                tool,
                args,
                summary,
            } => {
                let first_line = summary.lines().next().unwrap_or_default();
                eprintln!("[{:>2}] {} {} -> {}", iteration, tool, args, first_line);
            }
            TaskEvent::Done { result } => {
                if result.degraded {
                    eprintln!("[done] budget exhausted, answer assembled from evidence");
                } else {
                    eprintln!(
                        "[done] {} iterations, {} tool calls",
                        result.iterations,
                        result.evidence.len()
                    );
                }
                println!("{}", result.answer);
                return Ok(());
            }
            TaskEvent::Error { message } => bail!("Research failed: {}", message),
        }
    }
    bail!("Event stream closed without a result")
}
