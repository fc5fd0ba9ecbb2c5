mod output;
mod settings;
mod supervisor;

use clap::{Parser, Subcommand};
use output::{job_table, jobs_table, render_structured, status_table, OutputFormat};
use queuectl_core::{Job, JobState};
use queuectl_queue::{EnqueueRequest, Queue};
use queuectl_worker::{cancel_on_signal, ShellCommandRunner, Worker};
use settings::{LogFormat, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use supervisor::WorkerLaunch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(about = "Durable background job queue", long_about = None)]
struct Args {
    /// Path to a YAML settings file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Database file (overrides the settings file)
    #[arg(long, global = true, env = "QUEUECTL_DB_PATH")]
    db: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Log output format (overrides the settings file)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a job from JSON: {"id": .., "command": .., "max_retries": .., "run_at": ..}
    Enqueue {
        job: String,
    },

    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        action: WorkerCommand,
    },

    /// Show job counts per state and recorded workers
    Status,

    /// List jobs, newest first
    List {
        /// Only jobs in this state (pending, processing, completed, dead).
        /// `failed` is accepted and always lists nothing.
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Show one job
    Get {
        id: String,
    },

    /// Inspect or retry dead jobs
    Dlq {
        #[command(subcommand)]
        action: DlqCommand,
    },

    /// Read or write persisted queue settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Return jobs held by crashed workers to pending
    Recover {
        /// Claims older than this many seconds count as abandoned
        #[arg(long)]
        older_than: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    /// Spawn worker processes
    Start {
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Overrides the persisted backoff_base for these workers
        #[arg(long)]
        backoff_base: Option<f64>,

        /// Return immediately instead of waiting for the workers
        #[arg(long)]
        daemon: bool,
    },

    /// Run one worker in this process until SIGINT/SIGTERM
    Run {
        #[arg(long)]
        backoff_base: Option<f64>,

        /// Worker ID (auto-generated if not provided)
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Signal all recorded workers to finish their current job and exit
    Stop,
}

#[derive(Subcommand, Debug)]
enum DlqCommand {
    List,
    Retry { id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Jobs matching the `--state` filter. `failed` is reserved vocabulary that no
/// job is ever stored in, so it matches nothing.
async fn list_jobs(queue: &Queue, state: Option<&str>) -> anyhow::Result<Vec<Job>> {
    match state {
        Some("failed") => Ok(Vec::new()),
        Some(raw) => Ok(queue.list(Some(JobState::parse(raw)?)).await?),
        None => Ok(queue.list(None).await?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load settings, then let CLI flags and environment override
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        settings.db_path = db;
    }
    if let Some(log_format) = args.log_format {
        settings.log_format = log_format;
    }

    init_tracing(&settings.log_level, settings.log_format);

    let queue = Queue::open(&settings.db_path).await?;
    let format = args.format;

    match args.command {
        Commands::Enqueue { job } => {
            let job = queue.enqueue(EnqueueRequest::from_json(&job)?).await?;

            match render_structured(format, &job)? {
                Some(rendered) => println!("{}", rendered),
                None => println!("Job enqueued: {}", job.id),
            }
        }

        Commands::Worker { action } => match action {
            WorkerCommand::Start {
                count,
                backoff_base,
                daemon,
            } => {
                let launch = WorkerLaunch {
                    db_path: settings.db_path.to_string_lossy().into_owned(),
                    config_path: args.config.clone(),
                    backoff_base,
                };
                let (children, pids) =
                    supervisor::start_workers(queue.config(), &launch, count).await?;

                match render_structured(format, &pids)? {
                    Some(rendered) => println!("{}", rendered),
                    None => println!("Started {} worker(s): {:?}", pids.len(), pids),
                }

                if !daemon {
                    supervisor::supervise(queue.config(), children, pids).await?;
                }
            }

            WorkerCommand::Run {
                backoff_base,
                worker_id,
            } => {
                let mut config = settings.worker_config();
                config.backoff_base = backoff_base;
                config.worker_id = worker_id;

                let token = CancellationToken::new();
                cancel_on_signal(token.clone());

                let mut worker =
                    Worker::with_queue_policy(queue, Arc::new(ShellCommandRunner), config, token)
                        .await?;
                let summary = worker.run().await;

                if let Some(rendered) = render_structured(format, &summary)? {
                    println!("{}", rendered);
                }
            }

            WorkerCommand::Stop => {
                let signalled = supervisor::stop_workers(queue.config()).await?;
                println!("Sent stop signal to {} worker(s)", signalled);
            }
        },

        Commands::Status => {
            let status = queue.status().await?;
            match render_structured(format, &status)? {
                Some(rendered) => println!("{}", rendered),
                None => println!("{}", status_table(&status)),
            }
        }

        Commands::List { state } => {
            let jobs = list_jobs(&queue, state.as_deref()).await?;
            match render_structured(format, &jobs)? {
                Some(rendered) => println!("{}", rendered),
                None => println!("{}", jobs_table(&jobs)),
            }
        }

        Commands::Get { id } => match queue.get(&id).await? {
            Some(job) => match render_structured(format, &job)? {
                Some(rendered) => println!("{}", rendered),
                None => println!("{}", job_table(&job)),
            },
            None => anyhow::bail!("Job {} not found", id),
        },

        Commands::Dlq { action } => match action {
            DlqCommand::List => {
                let jobs = queue.list_dlq().await?;
                match render_structured(format, &jobs)? {
                    Some(rendered) => println!("{}", rendered),
                    None if jobs.is_empty() => println!("DLQ is empty"),
                    None => println!("{}", jobs_table(&jobs)),
                }
            }
            DlqCommand::Retry { id } => {
                let job = queue.retry_dlq_job(&id).await?;
                match render_structured(format, &job)? {
                    Some(rendered) => println!("{}", rendered),
                    None => println!("Job {} moved back to pending", job.id),
                }
            }
        },

        Commands::Config { action } => match action {
            ConfigCommand::Get { key } => {
                let value = queue.config().get(&key).await?;
                let entry = serde_json::json!({ "key": &key, "value": &value });
                match render_structured(format, &entry)? {
                    Some(rendered) => println!("{}", rendered),
                    None => match value {
                        Some(value) => println!("{} = {}", key, value),
                        None => println!("{} is not set", key),
                    },
                }
            }
            ConfigCommand::Set { key, value } => {
                queue.config().set(&key, &value).await?;
                println!("{} = {}", key, value);
            }
        },

        Commands::Recover { older_than } => {
            let threshold = match older_than {
                Some(secs) => std::time::Duration::from_secs(secs),
                None => settings.stale_threshold(),
            };
            let released = queue
                .release_stale(chrono::Duration::from_std(threshold)?)
                .await?;
            println!("Released {} stale job(s)", released);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_start() {
        let args = Args::try_parse_from([
            "queuectl", "worker", "start", "--count", "3", "--backoff-base", "1.5",
        ])
        .unwrap();
        match args.command {
            Commands::Worker {
                action:
                    WorkerCommand::Start {
                        count,
                        backoff_base,
                        daemon,
                    },
            } => {
                assert_eq!(count, 3);
                assert_eq!(backoff_base, Some(1.5));
                assert!(!daemon);
            }
            other => panic!("Expected worker start, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["queuectl", "dlq", "retry", "job1", "--format", "json"]).unwrap();
        assert_eq!(args.format, OutputFormat::Json);
        assert!(matches!(
            args.command,
            Commands::Dlq {
                action: DlqCommand::Retry { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_list_state_filter() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let queue = Queue::open(temp_dir.path().join("q.db")).await.unwrap();
        queue.enqueue(EnqueueRequest::new("job1", "true")).await.unwrap();

        assert_eq!(list_jobs(&queue, None).await.unwrap().len(), 1);
        assert_eq!(list_jobs(&queue, Some("pending")).await.unwrap().len(), 1);
        assert!(list_jobs(&queue, Some("dead")).await.unwrap().is_empty());
        assert!(list_jobs(&queue, Some("failed")).await.unwrap().is_empty());
        assert!(list_jobs(&queue, Some("bogus")).await.is_err());
    }

    #[test]
    fn test_enqueue_requires_payload() {
        assert!(Args::try_parse_from(["queuectl", "enqueue"]).is_err());
        assert!(Args::try_parse_from(["queuectl", "--format", "xml", "status"]).is_err());
    }
}
