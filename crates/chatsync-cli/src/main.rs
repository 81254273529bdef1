mod replay;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatsync_db::Database;
use chatsync_engine::{SyncConfig, SyncEngine, TracingLogger, WatermarkStore};
use clap::{Parser, Subcommand};
use tracing::info;

use replay::{ReplayClient, ReplayExtractor};

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Incremental conversation sync into a local store", long_about = None)]
struct Cli {
    /// SQLite database path (overrides CHATSYNC_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every conversation served by a replay file
    Sync {
        #[arg(long)]
        replay: PathBuf,
    },
    /// Print stored records as JSON lines, oldest first
    Export { conversation: Option<String> },
    /// Forget a conversation's cursor and delete its records
    Reset { conversation: String },
    /// Show the sync cursor of every known conversation
    Status,
}

fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "chatsync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let db = Arc::new(
        Database::open(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path.display()))?,
    );

    match cli.command {
        Commands::Sync { replay } => {
            let client = ReplayClient::load(&replay)?;
            let extractor = ReplayExtractor::new(config.timezone);
            let mut engine = SyncEngine::new(client, extractor, db, config, Arc::new(TracingLogger));

            let report = engine.run()?;
            println!(
                "conversations: {} synced, {} skipped, {} failed; records: {} appended, {} flagged",
                report.synced, report.skipped, report.failed, report.appended, report.flagged
            );
        }
        Commands::Export { conversation } => {
            let rows = db.export_records(conversation.as_deref())?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for row in &rows {
                serde_json::to_writer(&mut out, row)?;
                out.write_all(b"\n")?;
            }
            info!(records = rows.len(), "Export finished");
        }
        Commands::Reset { conversation } => {
            db.reset(&conversation)?;
            println!("reset {}", conversation);
        }
        Commands::Status => {
            for status in db.list_conversation_status()? {
                let last = status
                    .last_message_timestamp
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                let state = if !status.is_complete {
                    "incomplete"
                } else if status.had_transient_error {
                    "interrupted"
                } else {
                    "complete"
                };
                println!(
                    "{}\t{}\t{} records\tlast {}\t{}{}{}",
                    status.external_id,
                    status.display_name,
                    status.record_count,
                    last,
                    state,
                    if status.reached_conversation_start { ", full history" } else { "" },
                    if status.received_receipt { ", receipt" } else { "" },
                );
            }
        }
    }

    Ok(())
}
