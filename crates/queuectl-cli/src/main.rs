//! queuectl - background job queue CLI.
//!
//! Producers, workers, and admin commands are all invocations of this one
//! binary; the database file is the only thing they share. `worker start`
//! spawns detached copies of the binary running the worker loop; everything
//! else is a short-lived store operation.

mod manager;
mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use queuectl_core::{shutdown_channel, JobState, JobStore, NewJob, Worker};
use queuectl_job_sqlite::SqliteJobStore;
use tracing_subscriber::EnvFilter;

use crate::manager::WorkerManager;

#[derive(Parser)]
#[command(
    name = "queuectl",
    version,
    about = "Background job queue with retries, priorities, and a dead-letter queue"
)]
struct Cli {
    /// Database file (defaults to ~/.queuectl/data/queuectl.db)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Enqueue(EnqueueArgs),
    /// List jobs, optionally filtered by state
    List {
        /// pending, processing, completed, failed, or dead
        #[arg(long, value_name = "STATE")]
        state: Option<String>,
    },
    /// Show detailed information about a job, including its output
    Show { job_id: String },
    /// Show job counts and active workers
    Status,
    /// Remove a job from the queue
    Dequeue { job_id: String },
    /// Delete all jobs
    Clear {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Dead-letter queue operations
    #[command(subcommand)]
    Dlq(DlqCommand),
    /// Read or write queue configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage worker processes
    #[command(subcommand)]
    Worker(WorkerCommand),
}

#[derive(Args)]
struct EnqueueArgs {
    /// Unique job identifier
    #[arg(long)]
    id: String,
    /// Shell command to execute
    #[arg(long)]
    command: String,
    /// Maximum attempts before the job is dead-lettered
    #[arg(long)]
    max_retries: Option<i64>,
    /// Per-attempt timeout in seconds
    #[arg(long)]
    timeout: Option<i64>,
    /// Base for exponential retry backoff
    #[arg(long)]
    backoff_base: Option<i64>,
    /// Job priority 1-10 (higher runs first)
    #[arg(long)]
    priority: Option<i64>,
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List dead-lettered jobs
    List,
    /// Move a dead job back to the pending queue
    Retry { job_id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Set a configuration value (max-retries, backoff-base)
    Set { key: String, value: String },
    /// Read a configuration value
    Get { key: String },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Start worker processes
    Start {
        /// Number of workers to start
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Run a single worker in this terminal instead of detaching
        #[arg(long, short)]
        foreground: bool,
    },
    /// Run a single worker loop (spawned by `worker start`)
    #[command(hide = true)]
    Run {
        #[arg(long)]
        worker_id: String,
    },
    /// Stop all registered workers
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".queuectl").join("data").join("queuectl.db"))
}

/// The worker registry lives next to the database file.
fn registry_dir(db_path: &Path) -> PathBuf {
    match db_path.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };

    match cli.command {
        Commands::Enqueue(args) => {
            let store = SqliteJobStore::open(&db_path).await?;
            let job = NewJob {
                id: args.id.clone(),
                command: args.command,
                max_retries: args.max_retries,
                timeout: args.timeout,
                backoff_base: args.backoff_base,
                priority: args.priority,
            };
            store.enqueue(job).await?;
            println!("Job '{}' enqueued successfully", args.id);
        }

        Commands::List { state } => {
            let filter = state
                .as_deref()
                .map(str::parse::<JobState>)
                .transpose()?;
            let store = SqliteJobStore::open(&db_path).await?;
            let jobs = store.list(filter).await?;
            if jobs.is_empty() {
                match filter {
                    Some(state) => println!("No jobs with state '{state}'"),
                    None => println!("No jobs found"),
                }
            } else {
                println!("{}", render::job_table(&jobs));
                println!("\nTotal: {} job(s)", jobs.len());
            }
        }

        Commands::Show { job_id } => {
            let store = SqliteJobStore::open(&db_path).await?;
            match store.get(&job_id).await? {
                Some(job) => println!("{}", render::show_job(&job)),
                None => bail!("Job '{job_id}' not found"),
            }
        }

        Commands::Status => {
            let store = SqliteJobStore::open(&db_path).await?;
            let stats = store.stats().await?;
            let workers = WorkerManager::new(&registry_dir(&db_path))?.active()?;
            println!("{}", render::status_view(stats, workers.len()));
        }

        Commands::Dequeue { job_id } => {
            let store = SqliteJobStore::open(&db_path).await?;
            if store.delete(&job_id).await? {
                println!("Job '{job_id}' removed from queue");
            } else {
                bail!("Job '{job_id}' not found");
            }
        }

        Commands::Clear { yes } => {
            if !yes {
                bail!("this deletes ALL jobs; pass --yes to confirm");
            }
            let store = SqliteJobStore::open(&db_path).await?;
            let removed = store.clear_all().await?;
            println!("Cleared {removed} job(s) from the queue");
        }

        Commands::Dlq(DlqCommand::List) => {
            let store = SqliteJobStore::open(&db_path).await?;
            let jobs = store.dlq_list().await?;
            if jobs.is_empty() {
                println!("Dead Letter Queue is empty");
            } else {
                println!("{}", render::dlq_table(&jobs));
                println!("\nTotal: {} job(s) in DLQ", jobs.len());
            }
        }

        Commands::Dlq(DlqCommand::Retry { job_id }) => {
            let store = SqliteJobStore::open(&db_path).await?;
            store.dlq_retry(&job_id).await?;
            println!("Job '{job_id}' moved back to pending queue");
        }

        Commands::Config(ConfigCommand::Set { key, value }) => {
            let store = SqliteJobStore::open(&db_path).await?;
            store.set_config(&key, &value).await?;
            println!("Set {key} = {value}");
        }

        Commands::Config(ConfigCommand::Get { key }) => {
            let store = SqliteJobStore::open(&db_path).await?;
            match store.get_config(&key).await? {
                Some(value) => println!("{key} = {value}"),
                None => bail!("Config key '{key}' not found"),
            }
        }

        Commands::Worker(WorkerCommand::Start { count, foreground }) => {
            if count < 1 {
                bail!("count must be at least 1");
            }
            if foreground && count > 1 {
                bail!("foreground mode only supports 1 worker");
            }
            if foreground {
                let store = SqliteJobStore::open(&db_path).await?;
                println!("Starting worker in foreground (Ctrl+C to stop)...");
                run_worker(store, None).await;
            } else {
                let manager = WorkerManager::new(&registry_dir(&db_path))?;
                let started = manager.start(count, &db_path)?;
                println!("Started {} worker(s)", started.len());
            }
        }

        Commands::Worker(WorkerCommand::Run { worker_id }) => {
            let store = SqliteJobStore::open(&db_path).await?;
            run_worker(store, Some(worker_id)).await;
        }

        Commands::Worker(WorkerCommand::Stop) => {
            let manager = WorkerManager::new(&registry_dir(&db_path))?;
            let stopped = manager.stop()?;
            if stopped > 0 {
                println!("Stopped {stopped} worker(s)");
            } else {
                println!("No workers to stop");
            }
        }
    }

    Ok(())
}

/// Run the worker loop inline until an interrupt or terminate signal lands;
/// the in-flight job is allowed to finish.
async fn run_worker(store: SqliteJobStore, worker_id: Option<String>) {
    let (stop_tx, stop_rx) = shutdown_channel();
    let store: Arc<dyn JobStore> = Arc::new(store);
    let worker = match worker_id {
        Some(id) => Worker::with_id(id, store, stop_rx),
        None => Worker::new(store, stop_rx),
    };
    let worker_id = worker.worker_id().to_string();

    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                eprintln!("[{worker_id}] shutdown signal received, finishing current job...");
                let _ = stop_tx.send(true);
            }
            Err(e) => tracing::warn!(error = %e, "signal listener failed"),
        }
    });

    worker.run().await;
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
