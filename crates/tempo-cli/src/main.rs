use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use tempo_core::TempoConfig;
use tempo_scheduler::{
    Deliver, JsonCodec, MessageScheduler, PayloadCodec, RecurrenceRule, ReleaseEngine,
    ScheduleEntry, ScheduleExecutor, ScheduleStore, SqliteScheduleStore,
};

#[derive(Parser)]
#[command(name = "tempo", version, about = "Durable message scheduler")]
struct Cli {
    /// Config file path (falls back to TEMPO_CONFIG, then ~/.tempo/tempo.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schedule store schema (safe to run repeatedly).
    Setup,
    /// Schedule a JSON message.
    Add {
        /// Message payload as JSON.
        #[arg(long)]
        payload: String,
        /// Trigger time, RFC 3339 (e.g. 2026-09-01T08:00:00Z).
        #[arg(long)]
        at: String,
        /// Recurrence rule, e.g. FREQ=DAILY;COUNT=10.
        #[arg(long)]
        rule: Option<String>,
        /// Series start time, RFC 3339. Defaults to the trigger time for
        /// recurring schedules.
        #[arg(long)]
        start: Option<String>,
    },
    /// List pending schedules.
    Pending {
        /// Only show payloads whose top-level "type" field matches.
        #[arg(long = "type")]
        type_filter: Option<String>,
        /// Maximum number of rows. 0 means unbounded.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one schedule in detail.
    Show { id: String },
    /// Release every schedule due at the reference time.
    ReleasePending {
        /// Reference time, RFC 3339 or "now".
        #[arg(long, default_value = "now")]
        at: String,
    },
    /// Release one schedule immediately.
    Release { id: String },
    /// Run the background release engine until interrupted.
    Run,
}

/// Delivery capability for the CLI: print the payload to stdout.
///
/// A host application would plug its message bus in here instead.
struct StdoutDeliver;

impl Deliver for StdoutDeliver {
    fn deliver(
        &self,
        payload: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match std::str::from_utf8(payload) {
            Ok(text) => println!("delivered: {text}"),
            Err(_) => println!("delivered: <{} bytes>", payload.len()),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tempo=info,tempo_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = TempoConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        TempoConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("opening database at {db_path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    let store = Arc::new(SqliteScheduleStore::new(conn));
    if !matches!(cli.command, Command::Setup) {
        // every other command needs the schema in place
        store.setup()?;
    }

    match cli.command {
        Command::Setup => {
            store.setup()?;
            println!("schedule store ready at {db_path}");
        }

        Command::Add {
            payload,
            at,
            rule,
            start,
        } => {
            let message: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be valid JSON")?;
            let trigger_at = parse_time(&at)?;
            let rule = rule
                .as_deref()
                .map(str::parse::<RecurrenceRule>)
                .transpose()?;
            let start_at = match start {
                Some(s) => Some(parse_time(&s)?),
                None => rule.as_ref().map(|_| trigger_at),
            };

            let scheduler = MessageScheduler::new(Arc::clone(&store));
            let id = scheduler.schedule(&JsonCodec, &message, trigger_at, rule, start_at)?;
            println!("{id}");
        }

        Command::Pending { type_filter, limit } => {
            let ids = store.find_pending(None, limit)?;
            println!(
                "{:<38} {:<22} {:<12} {}",
                "ID", "TRIGGER AT", "TYPE", "RULE"
            );
            for id in ids {
                let entry = store.find(&id)?;
                let message_type = payload_type(&entry);
                if let Some(wanted) = &type_filter {
                    if message_type.as_deref() != Some(wanted.as_str()) {
                        continue;
                    }
                }
                println!(
                    "{:<38} {:<22} {:<12} {}",
                    entry.id,
                    entry.trigger_at.format("%Y-%m-%d %H:%M:%S"),
                    message_type.unwrap_or_else(|| "-".into()),
                    entry
                        .rule
                        .as_ref()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }

        Command::Show { id } => {
            let entry = store.find(&id)?;
            describe(&entry, store.execution_count(&id)?);
        }

        Command::ReleasePending { at } => {
            let reference = parse_time(&at)?;
            let executor = ScheduleExecutor::new(Arc::clone(&store), StdoutDeliver);
            let released = executor.release_due(reference, config.release.batch_limit)?;
            println!("released {released} schedule(s)");
        }

        Command::Release { id } => {
            let entry = store.find(&id)?;
            describe(&entry, store.execution_count(&id)?);
            let executor = ScheduleExecutor::new(Arc::clone(&store), StdoutDeliver);
            executor.execute(&id)?;
            println!("released {id}");
        }

        Command::Run => {
            let executor = ScheduleExecutor::new(Arc::clone(&store), StdoutDeliver);
            let engine = ReleaseEngine::new(executor, config.release.clone());
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = tokio::spawn(engine.run(shutdown_rx));

            tokio::signal::ctrl_c().await?;
            info!("interrupt received, stopping");
            shutdown_tx.send(true)?;
            handle.await?;
        }
    }

    Ok(())
}

/// Parse "now" or an RFC 3339 timestamp into UTC.
fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if s == "now" {
        return Ok(Utc::now());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("invalid time {s:?}, expected RFC 3339 or \"now\""))
}

/// Top-level "type" field of a JSON payload, if there is one.
fn payload_type(entry: &ScheduleEntry) -> Option<String> {
    let value: serde_json::Value = JsonCodec.decode(&entry.payload).ok()?;
    value.get("type")?.as_str().map(String::from)
}

fn describe(entry: &ScheduleEntry, executions: u32) {
    let fmt = |t: &DateTime<Utc>| t.format("%Y-%m-%d %H:%M:%S").to_string();
    println!("Id:          {}", entry.id);
    println!(
        "Type:        {}",
        payload_type(entry).unwrap_or_else(|| "-".into())
    );
    println!("Trigger at:  {}", fmt(&entry.trigger_at));
    println!(
        "Rule:        {}",
        entry
            .rule
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!(
        "Start at:    {}",
        entry.start_at.as_ref().map(fmt).unwrap_or_else(|| "-".into())
    );
    println!("State:       {}", entry.state);
    println!("Created at:  {}", fmt(&entry.created_at));
    println!("Executions:  {executions}");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}
