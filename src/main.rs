//! Hive 命令行
//!
//! 入口：初始化日志、加载配置与模块目录、构建引擎并执行子命令。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive::config::{load_config_or_default, AppConfig};
use hive::conversation::ConversationContext;
use hive::llm::create_client;
use hive::modules::{InMemoryModuleRepository, ModuleLoader};
use hive::store::{ExecutionStateStore, InMemoryExecutionStateStore, SqliteExecutionStateStore};
use hive::{Engine, Outcome, SessionSupervisor};

#[derive(Parser)]
#[command(name = "hive", version, about = "Resolve module-based system prompts")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行第 1/2 阶段并打印系统提示词；给出 --response 时继续执行第 4/5 阶段
    Resolve {
        /// 模板文件
        template: PathBuf,
        /// 本轮用户消息
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "cli")]
        conversation: String,
        #[arg(long)]
        persona: Option<String>,
        /// 主 AI 回复（模拟第 3 阶段）
        #[arg(long)]
        response: Option<String>,
    },
    /// 静态分析脚本
    Classify { script: PathBuf },
    /// 沙箱试运行脚本，不写执行状态
    Test {
        script: PathBuf,
        #[arg(long)]
        message: Option<String>,
    },
    /// 列出脚本可调用的能力
    Capabilities,
}

async fn build_engine(cfg: &AppConfig) -> anyhow::Result<Engine> {
    let repo = Arc::new(InMemoryModuleRepository::new());
    let loaded = ModuleLoader::new(&cfg.app.modules_dir)
        .load_into(repo.as_ref())
        .await
        .context("Failed to load modules")?;
    tracing::debug!(modules = loaded, dir = %cfg.app.modules_dir.display(), "module directory loaded");

    let store: Arc<dyn ExecutionStateStore> = match &cfg.app.state_db {
        Some(path) => Arc::new(
            SqliteExecutionStateStore::open(path)
                .with_context(|| format!("Failed to open state db {}", path.display()))?,
        ),
        None => Arc::new(InMemoryExecutionStateStore::new()),
    };

    let engine = Engine::builder(repo, create_client(&cfg.llm))
        .with_store(store)
        .with_settings(cfg.engine.clone())
        .build()?;
    Ok(engine)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();
    let cli = Cli::parse();
    let cfg = load_config_or_default(cli.config.clone());

    let supervisor = Arc::new(SessionSupervisor::new());
    {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, cancelling active sessions");
                supervisor.cancel_all();
            }
        });
    }

    match cli.command {
        Commands::Classify { script } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read {}", script.display()))?;
            print_json(&hive::script::classify(&source))?;
        }
        Commands::Capabilities => {
            let engine = build_engine(&cfg).await?;
            for cap in engine.list_capabilities() {
                println!("{:<24} [{}] {}", cap.name, cap.provider, cap.description);
            }
        }
        Commands::Test { script, message } => {
            let engine = build_engine(&cfg).await?;
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read {}", script.display()))?;
            let mut sample = ConversationContext::new("test");
            if let Some(message) = message {
                sample = sample.with_user_message(message);
            }
            let session = supervisor.begin(&sample.conversation_id);
            let run = engine.test_script(&source, &sample, session.token.clone()).await?;
            supervisor.finish(&session);
            print_json(&run)?;
        }
        Commands::Resolve {
            template,
            message,
            conversation,
            persona,
            response,
        } => {
            let engine = build_engine(&cfg).await?;
            let template = std::fs::read_to_string(&template)
                .with_context(|| format!("Failed to read {}", template.display()))?;
            let mut context = ConversationContext::new(conversation).with_user_message(message);
            if let Some(persona) = persona {
                context = context.with_persona(persona);
            }

            let session = supervisor.begin(&context.conversation_id);
            let resolution = match engine
                .resolve_stages_1_and_2(&template, &context, session.token.clone())
                .await?
            {
                Outcome::Completed(r) => r,
                Outcome::Cancelled => {
                    supervisor.finish(&session);
                    return Ok(());
                }
            };
            println!("{}", resolution.resolved_prompt);
            for warning in &resolution.warnings {
                eprintln!("warning: {warning}");
            }

            if let Some(response) = response {
                let outcome = engine
                    .spawn_post_response(template, response, context, session.token.clone())
                    .await
                    .context("Post-response task failed")??;
                if let Outcome::Completed(report) = outcome {
                    print_json(&report)?;
                }
            }
            supervisor.finish(&session);
        }
    }

    Ok(())
}
