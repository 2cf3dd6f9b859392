//! Inspect and maintain persisted agent state, and try truncation strategies
//! on a message file.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.
//!
//! # Examples
//!
//! ```sh
//! # Every identity the support bot has registered
//! recall --config recall.json identities support-bot
//!
//! # Stored chat history of one user
//! recall --config recall.json show support-bot --user u-17 --kind chat_history
//!
//! # Erase everything stored for a chat
//! recall --config recall.json remove support-bot --chat ticket-42
//!
//! # Drop old messages until the estimate fits 75% of 8000 tokens
//! recall truncate --input messages.json --budget 8000 --strategy token_based
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use recall_rs::config::RecallConfig;
use recall_rs::context::Context;
use recall_rs::context::manager::ContextManager;
use recall_rs::driver::DriverRegistry;
use recall_rs::truncation::{StrategyKind, estimate_total_tokens};
use recall_rs::{Message, Result, SessionIdentity};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;

/// Inspect and maintain persisted agent state.
#[derive(Parser)]
#[command(name = "recall", version)]
struct Cli {
    /// JSON config file. Without one, a single in-memory driver is used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the identities recorded in an agent's ledger
    Identities(Query),
    /// Print the stored items of every matching storage
    Show(Query),
    /// Empty every matching storage but keep it in the ledger
    Clear(Query),
    /// Delete every matching storage and drop it from the ledger
    Remove(Query),
    /// Truncate a JSON array of messages to fit a token budget
    Truncate(TruncateArgs),
}

#[derive(Args)]
struct Query {
    /// Agent whose ledger is queried
    agent: String,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    chat: Option<String>,

    #[arg(long)]
    group: Option<String>,

    /// Storage prefix, e.g. chat_history or preferences
    #[arg(long)]
    kind: Option<String>,
}

#[derive(Args)]
struct TruncateArgs {
    /// JSON file holding an array of messages
    #[arg(long)]
    input: PathBuf,

    /// Token budget threshold
    #[arg(long)]
    budget: usize,

    /// Current usage in tokens (estimated from the messages when omitted)
    #[arg(long)]
    usage: Option<usize>,

    /// Overrides the configured strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Recent messages kept by the simple strategy
    #[arg(long)]
    keep: Option<usize>,

    /// Budget fraction targeted by the token-based strategy (0.0 – 1.0]
    #[arg(long)]
    target: Option<f64>,
}

/// Strategies that run without a summarizer.
#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum StrategyArg {
    Simple,
    TokenBased,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Simple => StrategyKind::Simple,
            StrategyArg::TokenBased => StrategyKind::TokenBased,
        }
    }
}

// ── Commands ───────────────────────────────────────────────────────

fn context_manager(
    query: &Query,
    config: &RecallConfig,
    registry: &Arc<DriverRegistry>,
) -> Result<ContextManager<Context>> {
    let ledger = config.default_manager(registry)?;
    let factory_config = config.clone();
    let factory_registry = registry.clone();
    let mut manager = ContextManager::for_agent(
        query.agent.as_str(),
        ledger,
        move |session: &SessionIdentity| {
            Context::from_config(session.clone(), &factory_config, factory_registry.clone())
        },
    );
    if let Some(user) = &query.user {
        manager = manager.for_user(user.as_str());
    }
    if let Some(chat) = &query.chat {
        manager = manager.for_chat(chat.as_str());
    }
    if let Some(group) = &query.group {
        manager = manager.in_group(group.as_str());
    }
    if let Some(kind) = &query.kind {
        manager = manager.with_prefix(kind.as_str());
    }
    Ok(manager)
}

fn show(query: &Query, config: &RecallConfig, registry: &Arc<DriverRegistry>) -> Result<Value> {
    let storage = config.default_manager(registry)?;
    let mut entries = Vec::new();
    for identity in context_manager(query, config, registry)?.identities() {
        let items = match storage.read(&identity) {
            Ok(items) => items,
            Err(e) if e.is_not_found() => Value::Array(Vec::new()),
            Err(e) => return Err(e),
        };
        entries.push(json!({ "key": identity.key(), "items": items }));
    }
    Ok(Value::Array(entries))
}

async fn truncate(args: &TruncateArgs, config: &RecallConfig) -> Result<Value> {
    let json = std::fs::read_to_string(&args.input)?;
    let messages: Vec<Message> = serde_json::from_str(&json)?;

    let mut truncation = config.truncation.clone();
    if let Some(strategy) = args.strategy {
        truncation.strategy = strategy.into();
    }
    if let Some(keep) = args.keep {
        truncation.keep_messages = keep;
    }
    if let Some(target) = args.target {
        truncation.target_percentage = target;
    }
    let strategy = truncation.build(None)?;

    let usage = args
        .usage
        .unwrap_or_else(|| estimate_total_tokens(&messages, truncation.chars_per_token));
    let before = messages.len();
    let kept = strategy.truncate(messages, args.budget, usage).await;
    info!(
        "{} kept {} of {before} message(s) (usage {usage}, budget {})",
        strategy.name(),
        kept.len(),
        args.budget
    );
    Ok(serde_json::to_value(kept)?)
}

async fn run(cli: Cli) -> Result<Value> {
    let config = match &cli.config {
        Some(path) => RecallConfig::from_file(path)?,
        None => RecallConfig::default(),
    };
    let registry = Arc::new(config.build_registry()?);

    match &cli.command {
        Command::Identities(query) => {
            let keys: Vec<String> = context_manager(query, &config, &registry)?
                .identities()
                .iter()
                .map(SessionIdentity::key)
                .collect();
            Ok(json!(keys))
        }
        Command::Show(query) => show(query, &config, &registry),
        Command::Clear(query) => {
            let cleared = context_manager(query, &config, &registry)?.clear()?;
            Ok(json!({ "cleared": cleared }))
        }
        Command::Remove(query) => {
            let removed = context_manager(query, &config, &registry)?.remove()?;
            Ok(json!({ "removed": removed }))
        }
        Command::Truncate(args) => truncate(args, &config).await,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
