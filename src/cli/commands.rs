//! CLI parser and dispatch to command-specific modules.

mod analysis;
mod db;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::ai::GeminiAuditor;
use crate::config::Config;
use crate::feed::FeedClient;
use crate::queue::MemoryQueue;
use crate::repository::Database;
use crate::services::AnalysisService;
use crate::storage::LocalBlobStore;

#[derive(Parser)]
#[command(name = "procaudit")]
#[command(about = "Public procurement ingestion and AI risk-audit pipeline")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the analysis lifecycle
    Analysis {
        #[command(subcommand)]
        command: AnalysisCommands,
    },

    /// Run the analysis worker
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Manage the database
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum AnalysisCommands {
    /// Fetch a day's procurements and prepare pending analysis records
    Prepare {
        /// Publication date to ingest (YYYY-MM-DD)
        #[arg(long)]
        date: chrono::NaiveDate,
        /// Restrict to one federative unit (e.g. SP)
        #[arg(long)]
        region: Option<String>,
        /// Stop after preparing this many records
        #[arg(long)]
        max_messages: Option<usize>,
    },

    /// Publish one prepared analysis for processing
    Run {
        /// Analysis record id
        #[arg(long)]
        id: uuid::Uuid,
    },

    /// Publish the pending backlog by priority under the budget
    RunRanked {
        /// Stop after publishing this many analyses
        #[arg(long)]
        max_messages: Option<usize>,
    },

    /// Re-publish failed analyses whose backoff elapsed
    Retry,

    /// Mark analyses stuck in progress as timed out
    ReclaimStuck,
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start consuming analysis messages
    Start {
        /// Stop after handling this many messages
        #[arg(long)]
        max_messages: Option<u64>,
        /// Stop after this many seconds without messages
        #[arg(long)]
        timeout: Option<u64>,
        /// Override the model's output token cap
        #[arg(long)]
        max_output_tokens: Option<u32>,
        /// Serial processing, pausing for Enter between messages
        #[arg(long)]
        debug: bool,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create the schema (idempotent)
    Init,
}

/// Everything a command needs, built once from configuration.
pub(crate) struct AppContext {
    pub config: Config,
    pub service: Arc<AnalysisService>,
    pub queue: Arc<MemoryQueue>,
}

impl AppContext {
    fn build(config: Config) -> anyhow::Result<Self> {
        let db = Database::open(std::path::Path::new(&config.database.path))?;
        let feed = Arc::new(FeedClient::new(config.feed.clone())?);
        let auditor = Arc::new(GeminiAuditor::new(config.ai.clone())?);
        let queue = Arc::new(MemoryQueue::new(config.queue.clone()));
        let blobs = Arc::new(LocalBlobStore::new(&config.storage.blobs_dir));
        let service = Arc::new(AnalysisService::new(
            config.clone(),
            db,
            feed,
            auditor,
            Arc::clone(&queue) as _,
            blobs,
        ));
        Ok(Self { config, service, queue })
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(path) => Config::load_from_path(&path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Db { command } => match command {
            DbCommands::Init => db::cmd_init(&config).await,
        },
        Commands::Analysis { command } => {
            let ctx = AppContext::build(config)?;
            match command {
                AnalysisCommands::Prepare { date, region, max_messages } => {
                    analysis::cmd_prepare(&ctx, date, region.as_deref(), max_messages).await
                }
                AnalysisCommands::Run { id } => analysis::cmd_run(&ctx, id).await,
                AnalysisCommands::RunRanked { max_messages } => {
                    analysis::cmd_run_ranked(&ctx, max_messages).await
                }
                AnalysisCommands::Retry => analysis::cmd_retry(&ctx).await,
                AnalysisCommands::ReclaimStuck => analysis::cmd_reclaim_stuck(&ctx).await,
            }
        }
        Commands::Worker { command } => match command {
            WorkerCommands::Start { max_messages, timeout, max_output_tokens, debug } => {
                if let Some(tokens) = max_output_tokens {
                    config.ai.max_output_tokens = tokens;
                }
                let ctx = AppContext::build(config)?;
                worker::cmd_start(&ctx, max_messages, timeout, debug).await
            }
        },
    }
}
