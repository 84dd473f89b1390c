/**
 * syncq command-line entry point
 *
 * Inspects and drives the on-disk queue: status counts, a one-off drain,
 * clearing finished records, and queueing a file for analysis.
 */

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use syncq::client::api_client::HttpOperationHandler;
use syncq::client::local_db::SqliteStore;
use syncq::client::offline::{DrainOutcome, FileMetadataAnalyzer, HandlerRegistry, OfflineQueue};
use syncq::shared::{AnalysisJobSpec, JobFile, QueueConfig};

#[derive(Debug, Parser)]
#[command(name = "syncq", version, about = "Offline-first operation queue")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print record counts per status as JSON
    Status,
    /// Dispatch every ready sync operation once
    Drain,
    /// Remove completed and failed records
    Clear,
    /// Queue a file for analysis and wait for the result
    Analyze {
        path: PathBuf,
        /// User the job runs for
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long)]
        deep_scan: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = QueueConfig::load(cli.config.as_deref())?;

    let database_path = config.resolved_database_path();
    tracing::debug!("[STARTUP] Using database {}", database_path.display());
    let store = Arc::new(SqliteStore::open(&database_path).await?);

    let registry =
        HandlerRegistry::new().with_all(Arc::new(HttpOperationHandler::from_config(&config)?));
    let queue = OfflineQueue::builder(config, store, registry, Arc::new(FileMetadataAnalyzer))
        .build()?;
    queue.init().await?;

    let result = run(&queue, cli.command).await;
    queue.shutdown().await;
    result
}

async fn run(queue: &OfflineQueue, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Status => {
            let status = queue.get_queue_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Drain => match queue.force_sync().await? {
            DrainOutcome::Completed(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            DrainOutcome::Skipped(reason) => println!("drain skipped: {:?}", reason),
        },
        Command::Clear => {
            let cleared = queue.clear_completed_operations().await?;
            println!("{}", serde_json::to_string_pretty(&cleared)?);
        }
        Command::Analyze {
            path,
            user,
            deep_scan,
        } => {
            let size = std::fs::metadata(&path)?.len();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let file = JobFile::path(name, "application/octet-stream", size, path);

            let mut spec = AnalysisJobSpec::new(user, file);
            spec.options.deep_scan = deep_scan;

            let id = queue.queue_analysis(spec).await?;
            queue.processor().wait_idle().await;

            let job = queue.processor().get_job(&id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }
    Ok(())
}
