use pincer::assistant::Assistant;
use pincer::config::Config;
use pincer::db::Database;
use pincer::llm::LlmClient;
use pincer::persona;
use pincer::sched::{NotificationSink, TokioScheduler};
use pincer::skills::approval::InterceptToken;
use pincer::skills::builtin::{register_builtin, BuiltinDeps};
use pincer::skills::SkillRegistry;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

const PLATFORM: &str = "cli";
const USER: &str = "local";

/// Terminal delivery for proactive messages. Everything delivered here also
/// lands in the conversation record so the model can refer back to it.
struct TerminalSink {
    db: Database,
}

#[async_trait]
impl NotificationSink for TerminalSink {
    async fn notify(&self, platform: &str, user_id: &str, message: &str) -> anyhow::Result<()> {
        println!("\n[notification] {message}");
        self.db
            .append_message(platform, user_id, None, "assistant", message, None)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting with {:?}", config);

    if let Some(parent) = Path::new(&config.database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(&config.database_url)?;
    db.execute_init()?;

    let llm = Arc::new(LlmClient::new(&config));
    if !llm.check_health().await {
        warn!("Inference server unreachable; replies will fail until it comes up");
    }

    let scheduler = Arc::new(TokioScheduler::new());
    let sink = Arc::new(TerminalSink { db: db.clone() });

    let mut registry = SkillRegistry::new(config.admin_identity.clone());
    register_builtin(
        &mut registry,
        &BuiltinDeps {
            db: db.clone(),
            scheduler,
            sink,
            http: reqwest::Client::new(),
        },
    );
    let assistant = Assistant::new(&config, db, llm.clone(), Arc::new(registry));

    println!("pincer ready. Type a message, or /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let verb = parts.next().unwrap_or_default();
            let rest = parts.next().unwrap_or_default().trim();
            match verb {
                "quit" | "exit" => break,
                "help" => {
                    println!(
                        "/pending       list actions awaiting approval\n\
                         /approve <id>  run a pending high-risk action\n\
                         /deny <id>     discard a pending high-risk action\n\
                         /reset         clear conversation history\n\
                         /persona [id]  show or switch persona\n\
                         /quick <msg>   chat without the action protocol\n\
                         /models        list models on the inference server\n\
                         /stats         conversation statistics\n\
                         /quit          exit"
                    );
                }
                "pending" => {
                    let pending = assistant.pending_approvals();
                    if pending.is_empty() {
                        println!("No pending approvals.");
                    }
                    for (id, request) in pending {
                        println!(
                            "{id}  {}  requested by {} at {}",
                            request.skill, request.initiator, request.created_at
                        );
                    }
                }
                "approve" => match assistant.approve(PLATFORM, USER, rest).await {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("{e}"),
                },
                "deny" => match assistant.deny(rest) {
                    Ok(()) => println!("Request {rest} denied."),
                    Err(e) => println!("{e}"),
                },
                "reset" => match assistant.reset(PLATFORM, USER, None) {
                    Ok(count) => println!("Cleared {count} messages."),
                    Err(e) => println!("Reset failed: {e}"),
                },
                "persona" => {
                    if rest.is_empty() {
                        let active = assistant.persona();
                        for p in persona::all() {
                            let marker = if p.id == active { "*" } else { " " };
                            println!("{marker} {} - {}", p.id, p.name);
                        }
                    } else if assistant.set_persona(rest) {
                        println!("Persona switched to {rest}.");
                    } else {
                        println!("Unknown persona '{rest}'.");
                    }
                }
                "quick" => {
                    if rest.is_empty() {
                        println!("Usage: /quick <message>");
                        continue;
                    }
                    let (tx, mut rx) = mpsc::channel::<String>(32);
                    let printer = tokio::spawn(async move {
                        let mut stdout = tokio::io::stdout();
                        while let Some(chunk) = rx.recv().await {
                            let _ = stdout.write_all(chunk.as_bytes()).await;
                            let _ = stdout.flush().await;
                        }
                        let _ = stdout.write_all(b"\n").await;
                    });
                    assistant
                        .quick_chat_stream(PLATFORM, USER, None, rest, tx)
                        .await;
                    let _ = printer.await;
                }
                "models" => match llm.available_models().await {
                    Ok(models) => {
                        for model in models {
                            println!("{model}");
                        }
                    }
                    Err(e) => println!("Failed to list models: {e:#}"),
                },
                "stats" => match assistant.stats() {
                    Ok(stats) => println!(
                        "{} messages from {} users",
                        stats.total_messages, stats.unique_users
                    ),
                    Err(e) => println!("Stats failed: {e}"),
                },
                _ => println!("Unknown command '/{verb}'. Try /help."),
            }
            continue;
        }

        let (tx, mut rx) = mpsc::channel::<String>(32);
        let printer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = rx.recv().await {
                let _ = stdout.write_all(chunk.as_bytes()).await;
                let _ = stdout.flush().await;
            }
            let _ = stdout.write_all(b"\n").await;
        });
        let reply = assistant
            .handle_message_stream(PLATFORM, USER, None, line, tx)
            .await;
        let _ = printer.await;
        if let Some(token) = InterceptToken::parse(&reply) {
            println!(
                "'{}' needs approval: /approve {} or /deny {}",
                token.command, token.request_id, token.request_id
            );
        }
    }

    info!("Shutting down");
    Ok(())
}
