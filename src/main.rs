use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};

use unsub_assist::agent::InteractiveAgent;
use unsub_assist::browser::{ChromiumEngine, ChromiumOptions};
use unsub_assist::config::UnsubscribeConfig;
use unsub_assist::llm::{LlmConfig, create_provider};
use unsub_assist::message::ParsedEmail;
use unsub_assist::store::{LibSqlBackend, MessageStatus, UnsubscribeStore};
use unsub_assist::unsubscribe::{OneClickExecutor, Orchestrator};

const USAGE: &str = "usage:
  unsub-assist import <user-id> <file.eml>...
  unsub-assist run <user-id> [message-id...]
  unsub-assist attempts <message-id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("UNSUB_DB_PATH").unwrap_or_else(|_| "./data/unsub-assist.db".to_string());
    let store = Arc::new(
        LibSqlBackend::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("failed to open database at {db_path}"))?,
    );

    match command.as_str() {
        "import" => import(store, rest).await,
        "run" => run(store, rest).await,
        "attempts" => attempts(store, rest).await,
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

async fn import(store: Arc<LibSqlBackend>, args: &[String]) -> anyhow::Result<()> {
    let [user_id, files @ ..] = args else {
        bail!("{USAGE}");
    };
    if files.is_empty() {
        bail!("{USAGE}");
    }

    for file in files {
        let raw = std::fs::read(file).with_context(|| format!("failed to read {file}"))?;
        let Some(email) = ParsedEmail::parse(&raw) else {
            tracing::warn!(file = %file, "Not a parseable email, skipping");
            continue;
        };
        let id = store.insert_message(&email.into_new_message(user_id)).await?;
        tracing::info!(file = %file, id = %id, "Imported message");
        println!("{id}");
    }
    Ok(())
}

async fn run(store: Arc<LibSqlBackend>, args: &[String]) -> anyhow::Result<()> {
    let [user_id, ids @ ..] = args else {
        bail!("{USAGE}");
    };

    let config = UnsubscribeConfig::from_env()?;

    // No ids means every pending message for the user.
    let message_ids: Vec<String> = if ids.is_empty() {
        store
            .list_messages_for_user(user_id)
            .await?
            .into_iter()
            .filter(|m| m.status == MessageStatus::Pending)
            .map(|m| m.id)
            .collect()
    } else {
        ids.to_vec()
    };

    let llm = match LlmConfig::from_env() {
        Some(llm_config) => Some(create_provider(&llm_config)?),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, interactive agent disabled");
            None
        }
    };

    let engine = Arc::new(ChromiumEngine::new(
        ChromiumOptions::from_env().with_user_agent(config.user_agent.clone()),
    ));
    let agent = Arc::new(InteractiveAgent::new(engine, llm, config.agent.clone()));
    let one_click = Arc::new(OneClickExecutor::new(
        &config.user_agent,
        config.one_click_timeout,
    ));

    eprintln!("📭 unsub-assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Messages: {}", message_ids.len());
    eprintln!("   One-click policy: {}\n", config.one_click_policy.as_str());

    let orchestrator = Orchestrator::new(store, one_click, agent)
        .with_policy(config.one_click_policy)
        .with_batch_deadline(config.batch_deadline);
    let outcomes = orchestrator.resolve_batch(user_id, &message_ids).await;

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}

async fn attempts(store: Arc<LibSqlBackend>, args: &[String]) -> anyhow::Result<()> {
    let [message_id] = args else {
        bail!("{USAGE}");
    };
    let records = store.list_attempts(message_id).await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
