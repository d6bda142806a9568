//! jobq CLI tool.

use clap::{Parser, Subcommand};
use jobq_config::LogFormat;
use jobq_core::JobState;
use std::path::PathBuf;

mod commands;
mod context;
mod logging;

use context::Context;

#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "Durable job queue with workers, retries and a dead-letter queue", long_about = None)]
struct Cli {
    /// Queue database (path or sqlite:// URL)
    #[arg(long, env = "JOBQ_DATABASE_URL", global = true)]
    db: Option<String>,

    /// Process settings file (KDL)
    #[arg(long, env = "JOBQ_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_parser = parse_log_format, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job from a JSON payload
    Enqueue {
        /// Job JSON, e.g. '{"id":"job1","command":"echo hi"}'
        json: Option<String>,
        /// Read the job JSON from a file instead
        #[arg(long, conflicts_with = "json")]
        file: Option<PathBuf>,
        /// Job priority (higher runs first)
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i64>,
    },
    /// List jobs
    List {
        /// Filter by state
        #[arg(long, value_parser = parse_state)]
        state: Option<JobState>,
        /// Maximum number of jobs to show
        #[arg(long, default_value = "100")]
        limit: u32,
    },
    /// Show job counts, workers and the shutdown flag
    Status,
    /// Dead-letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Manage runtime configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead jobs
    List {
        #[arg(long, default_value = "100")]
        limit: u32,
    },
    /// Move a dead job back to pending
    Retry {
        /// Job ID
        job_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show one key, or every key when none is given
    Get { key: Option<String> },
    /// Set a key
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start detached worker processes
    Start {
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// Ask all workers to finish their current job and exit
    Stop,
    /// Run a single worker in the foreground
    Run {
        /// Worker ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: jobq_config::ConfigError| e.to_string())
}

fn parse_state(s: &str) -> Result<JobState, String> {
    s.parse().map_err(|e: jobq_core::Error| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = context::load_settings(cli.config.as_deref(), cli.db, cli.log_format)?;
    logging::init(settings.log_format);
    let ctx = Context::open(settings).await?;

    match cli.command {
        Commands::Enqueue {
            json,
            file,
            priority,
        } => {
            commands::jobs::enqueue(&ctx, json, file, priority).await?;
        }
        Commands::List { state, limit } => {
            commands::jobs::list(&ctx, state, limit).await?;
        }
        Commands::Status => {
            commands::jobs::status(&ctx).await?;
        }
        Commands::Dlq { command } => match command {
            DlqCommands::List { limit } => {
                commands::dlq::list(&ctx, limit).await?;
            }
            DlqCommands::Retry { job_id } => {
                commands::dlq::retry(&ctx, &job_id).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => {
                commands::config::get(&ctx, key.as_deref()).await?;
            }
            ConfigCommands::Set { key, value } => {
                commands::config::set(&ctx, &key, &value).await?;
            }
        },
        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => {
                commands::worker::start(&ctx, count, cli.config.as_deref()).await?;
            }
            WorkerCommands::Stop => {
                commands::worker::stop(&ctx).await?;
            }
            WorkerCommands::Run { id } => {
                commands::worker::run(&ctx, id).await?;
            }
        },
    }

    Ok(())
}
