use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{bail, Result};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::Subscriber, EnvFilter};

use starknet_transfer_indexer::{
    api, db, IngestArgs, StarknetRpc, TimeWindow, WindowOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "starknet-transfer-indexer", version)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, env = "DB_PATH", default_value = "transfers.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one window and persist the facilitator's transfers
    Run {
        /// Starknet JSON-RPC HTTP URL
        #[arg(long, env = "STARKNET_RPC_URL")]
        rpc_url: String,

        /// Window start (unix seconds); defaults to the end of the last run
        #[arg(long)]
        since: Option<u64>,

        /// Window length used when there is no previous run
        #[arg(long, env = "LOOKBACK_SECS", default_value_t = 3600)]
        lookback_secs: u64,

        #[command(flatten)]
        ingest: IngestArgs,
    },
    /// Print recent transfers as JSON
    Query {
        #[arg(long)]
        facilitator: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the schema used by the indexer
    Schema,
    /// Serve the read API
    Serve {
        #[arg(long, env = "HTTP_BIND", default_value = "127.0.0.1:8080")]
        http_bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    Subscriber::builder().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { rpc_url, since, lookback_secs, ingest } => {
            // Validate before touching the network or the database.
            let config = ingest.to_config()?;
            let mut conn = db::init(&cli.db_path)?;
            let transport = Arc::new(StarknetRpc::connect(&rpc_url)?);

            let now = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
            let window = match since {
                Some(since) => TimeWindow::new(since, now)?,
                None => {
                    let start = db::window_cursor(&conn, &config.chain_id, &config.facilitator_id)?
                        .unwrap_or_else(|| now.saturating_sub(lookback_secs));
                    match TimeWindow::pending(start, now) {
                        Some(window) => window,
                        None => {
                            info!(cursor = start, now, "already caught up, nothing to ingest");
                            return Ok(());
                        }
                    }
                }
            };

            let max_run = config.max_run_duration;
            let mut orchestrator = WindowOrchestrator::new(transport, config.clone());
            let report = match tokio::time::timeout(max_run, orchestrator.run(window)).await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    error!(
                        retryable = e.is_retryable(),
                        error = %e,
                        "window failed, nothing persisted"
                    );
                    return Err(e.into());
                }
                Err(_) => bail!("window run exceeded {max_run:?}, abandoned"),
            };

            if report.truncated {
                warn!(
                    since = window.since(),
                    resume_from = ?report.resume_from,
                    "window truncated, next run resumes mid-window"
                );
            }
            let written = db::persist_window(
                &mut conn,
                &config.chain_id,
                &config.facilitator_id,
                &report.transfers,
                report.resume_from,
            )?;
            info!(
                written,
                events = report.events_fetched,
                pages = report.pages,
                decode_failures = report.decode_failures,
                filtered_out = report.filtered_out,
                unresolved_blocks = report.unresolved_blocks,
                unresolved_transactions = report.unresolved_transactions,
                "window persisted"
            );
        }
        Commands::Query { facilitator, limit } => {
            let conn = db::init(&cli.db_path)?;
            let rows = db::recent_transfers(&conn, facilitator.as_deref(), limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Schema => {
            println!("{}", db::SCHEMA_SQL);
        }
        Commands::Serve { http_bind } => {
            api::serve(&cli.db_path, &http_bind).await?;
        }
    }

    Ok(())
}
