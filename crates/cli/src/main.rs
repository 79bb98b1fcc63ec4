mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{ArgAction, Parser, Subcommand};
use runtime::{
    Message, Orchestrator, Progress, RunOptions, SqliteToolCache, StoreAuditSink, Termination,
    ToolRegistry, summarize,
};
use storage::{CallLogStore, CallRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "skiff.toml";
const DATABASE_FILE: &str = "skiff.db";

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Answer questions with tools from MCP services", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question the model may answer with tools
    Ask {
        question: String,
        /// Conversation id to log calls under
        #[arg(long)]
        conversation: Option<String>,
        /// Override the configured round budget
        #[arg(long)]
        max_rounds: Option<u32>,
    },
    /// List the tools each service offers
    Tools {
        /// Ping every service as well
        #[arg(long)]
        ping: bool,
        /// Ask services for their tools instead of using the cache
        #[arg(long)]
        refresh: bool,
    },
    /// Show logged tool calls
    Logs {
        /// Conversation id
        #[arg(long)]
        conversation: Option<String>,
        /// Show only the last N conversations
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ask {
            question,
            conversation,
            max_rounds,
        } => cmd_ask(&cli.config, question, conversation, max_rounds).await,
        Commands::Tools { ping, refresh } => cmd_tools(&cli.config, ping, refresh).await,
        Commands::Logs {
            conversation,
            limit,
        } => cmd_logs(conversation.as_deref(), limit),
    }
}

async fn cmd_ask(
    config_path: &Path,
    question: String,
    conversation: Option<String>,
    max_rounds: Option<u32>,
) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let backend = config.build_backend()?;
    let db_path = database_path()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    let registry = Arc::new(open_registry(&config, &db_path)?);
    let loaded = registry.load(&cancel).await;
    info!(services = registry.services().await.len(), tools = loaded, "tools loaded");

    let audit = Arc::new(StoreAuditSink::open(&db_path)?);
    let orchestrator = Orchestrator::new(backend, Arc::clone(&registry)).with_audit(audit.clone());
    let tools = orchestrator.available_tools(config.allow.as_ref()).await;

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(progress_rx));

    let mut options = RunOptions::default()
        .with_max_rounds(max_rounds.unwrap_or(config.orchestrator.max_rounds))
        .with_progress(progress_tx)
        .with_cancel(cancel);
    if let Some(id) = conversation {
        options = options.with_conversation_id(id);
    }
    let conversation_id = options.conversation_id.clone();

    let messages = vec![
        Message::system(&config.orchestrator.system_prompt),
        Message::user(question),
    ];
    let result = orchestrator.run(messages, tools, options).await;

    registry.close().await;
    if tokio::task::spawn_blocking(move || audit.close()).await.is_err() {
        warn!("audit writer failed to close");
    }
    if printer.await.is_err() {
        warn!("progress printer failed");
    }

    let output = result?;
    match output.termination {
        Termination::ExhaustedFailed => {
            eprintln!("No final answer: the round budget ran out and the last model call failed.");
        }
        _ => println!("{}", output.final_answer),
    }
    eprintln!(
        "\nconversation {conversation_id}: {} tool call(s), {} failed, {} document(s)",
        output.outcomes.len(),
        output.failed_calls(),
        output.documents.len()
    );
    Ok(())
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<Progress>) {
    while let Some(event) = rx.recv().await {
        match event {
            Progress::RoundStarted { round, max_rounds } => {
                eprintln!("-- round {}/{max_rounds}", round + 1);
            }
            Progress::ToolCallStarted { name, .. } => eprintln!("   calling {name}"),
            Progress::ToolCallFinished {
                name,
                is_error,
                duration_ms,
                summary,
                ..
            } => {
                let mark = if is_error { "failed" } else { "ok" };
                eprintln!("   {name} {mark} ({duration_ms} ms): {summary}");
            }
            Progress::FinalAnswer { termination, .. } => {
                if termination != Termination::Answered {
                    eprintln!("-- stopped: {termination:?}");
                }
            }
        }
    }
}

async fn cmd_tools(config_path: &Path, ping: bool, refresh: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    if config.services.is_empty() {
        println!("No services configured in {}.", config_path.display());
        return Ok(());
    }

    let db_path = database_path()?;
    let registry = open_registry(&config, &db_path)?;
    let cancel = CancellationToken::new();
    registry.load(&cancel).await;

    let up = registry.services().await;
    for name in config.services.keys() {
        if !up.contains(name) {
            println!("{name}: unavailable");
        }
    }

    for name in &up {
        if refresh {
            if let Err(e) = registry.refresh_tools(name, &cancel).await {
                println!("{name}: refresh failed: {e}");
            }
        }
        let status = if ping {
            match registry.ping(name, &cancel).await {
                Ok(()) => " (ping ok)".to_string(),
                Err(e) => format!(" (ping failed: {e})"),
            }
        } else {
            String::new()
        };
        println!("{name}{status}");

        for (service, tool) in registry.descriptors().await {
            if &service != name {
                continue;
            }
            let allowed = policy::check(config.allow.as_ref(), &service, &tool.name);
            let marker = if allowed.is_allowed() { " " } else { "x" };
            println!(
                "  [{marker}] {}  {}",
                runtime::tools::qualified_name(&service, &tool.name),
                tool.description
            );
        }
    }

    registry.close().await;
    Ok(())
}

fn cmd_logs(conversation: Option<&str>, limit: usize) -> Result<()> {
    let store = open_store()?;

    let Some(conversation) = conversation else {
        let summaries = store.conversations()?;
        if summaries.is_empty() {
            println!("No calls logged.");
            return Ok(());
        }
        println!(
            "{:<36}  {:<16}  {:<6}  FAILED",
            "CONVERSATION", "LAST CALL", "CALLS"
        );
        println!("{}", "-".repeat(72));
        for summary in summaries.into_iter().take(limit) {
            let last = Local
                .from_utc_datetime(&summary.last_call.naive_utc())
                .format("%Y-%m-%d %H:%M");
            println!(
                "{:<36}  {:<16}  {:<6}  {}",
                summary.conversation_id, last, summary.calls, summary.failures
            );
        }
        return Ok(());
    };

    let records = store.load_conversation(conversation)?;
    if records.is_empty() {
        return Err(Error::ConversationNotFound(conversation.to_string()));
    }
    println!("Conversation: {conversation}\n");
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &CallRecord) {
    let time = Local
        .from_utc_datetime(&record.created_at.naive_utc())
        .format("%H:%M:%S");
    println!(
        "[{time}] {}/{} {} ({} ms)",
        record.origin(),
        record.tool,
        record.status,
        record.duration_ms
    );
    println!("    args: {}", summarize(&record.request_payload));
    if let Some(response) = &record.response_payload {
        println!("    result: {}", summarize(response));
    }
    if let Some(error) = &record.error_message {
        println!("    error: {}", summarize(error));
    }
}

fn open_registry(config: &Config, db_path: &Path) -> Result<ToolRegistry> {
    let cache = SqliteToolCache::open(db_path)?;
    Ok(ToolRegistry::new(config.services.clone()).with_cache(Arc::new(cache)))
}

fn database_path() -> Result<PathBuf> {
    let data_dir = dirs_data_dir().unwrap_or_else(|| ".skiff".into());
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join(DATABASE_FILE))
}

fn open_store() -> Result<CallLogStore> {
    let data_dir = dirs_data_dir().unwrap_or_else(|| ".skiff".into());
    let db_path = data_dir.join(DATABASE_FILE);

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(CallLogStore::open(&db_path)?)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/skiff"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("skiff"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("skiff"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
