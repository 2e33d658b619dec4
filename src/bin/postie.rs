//! `postie` CLI: post files to Usenet immediately, or watch a directory and
//! post each new file as it arrives.

use clap::{Parser, Subcommand};
use postie::config::{Config, JobRequest};
use postie::db::Database;
use postie::folder_watcher::FolderWatcher;
use postie::par2::{CliPar2Executor, NoOpPar2Executor, Par2Executor};
use postie::pausable::PausableContext;
use postie::pool::PoolFacade;
use postie::processor::Processor;
use postie::types::JobId;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_JOB_ERROR: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "postie", about = "Durable, multi-provider Usenet posting pipeline", version)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, env = "POSTIE_CONFIG", default_value = "postie.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Post one or more files (or directories) immediately
    Post {
        /// Files or directories to post
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Override the configured output directory
        #[arg(long)]
        output_folder: Option<PathBuf>,
        /// Scheduling priority; higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Watch a directory for new files and post each as it stabilizes
    Watch {
        /// Directory to watch; overrides `watcher.dir` from the config file
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Override the configured output directory
        #[arg(long)]
        output_folder: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %cli.config.display(), "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match cli.command {
        Command::Post { paths, output_folder, priority } => {
            if let Some(dir) = output_folder {
                config.output_dir = dir;
            }
            run_post(config, paths, priority).await
        }
        Command::Watch { dir, output_folder } => {
            if let Some(dir) = dir {
                config.watcher.dir = dir;
            }
            if let Some(dir) = output_folder {
                config.output_dir = dir;
            }
            run_watch(config).await
        }
    }
}

fn load_config(path: &PathBuf) -> Result<Config, String> {
    let body = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&body).map_err(|e| e.to_string())
}

async fn build_par2_executor(config: &Config) -> Arc<dyn Par2Executor> {
    if !config.par2.enabled {
        return Arc::new(NoOpPar2Executor);
    }

    let executor = match &config.par2.par2_path {
        Some(path) => Some(CliPar2Executor::new(
            path.clone(),
            config.posting.article_size_bytes,
            config.par2.redundancy.clone(),
            config.par2.volume_size_bytes,
            config.par2.max_input_slices,
            config.par2.extra_options.clone(),
        )),
        None => CliPar2Executor::from_path(
            config.posting.article_size_bytes,
            config.par2.redundancy.clone(),
            config.par2.volume_size_bytes,
            config.par2.max_input_slices,
            config.par2.extra_options.clone(),
        ),
    };

    match executor {
        Some(executor) => Arc::new(executor),
        None => {
            tracing::warn!("par2.enabled is true but no par2/parpar binary was found; recovery data will be skipped");
            Arc::new(NoOpPar2Executor)
        }
    }
}

async fn run_post(config: Config, paths: Vec<PathBuf>, priority: i64) -> ExitCode {
    let pool = match PoolFacade::new(&config.servers).await {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::error!(error = %e, "failed to build provider pools");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let par2_executor = build_par2_executor(&config).await;
    let processor = Processor::new(pool, par2_executor, config, None);

    let request = JobRequest { paths, priority };
    let ctx = PausableContext::new();
    let cancel_ctx = ctx.clone();

    tokio::select! {
        result = processor.process(JobId::new(), &request, ctx) => {
            match result {
                Ok(outcome) if outcome.outcome.errors.is_empty() => ExitCode::from(EXIT_OK),
                Ok(_) => ExitCode::from(EXIT_JOB_ERROR),
                Err(postie::Error::Cancelled) => ExitCode::from(EXIT_CANCELLED),
                Err(e) => {
                    tracing::error!(error = %e, "job failed");
                    ExitCode::from(EXIT_JOB_ERROR)
                }
            }
        }
        _ = postie::wait_for_signal() => {
            cancel_ctx.cancel();
            ExitCode::from(EXIT_CANCELLED)
        }
    }
}

async fn run_watch(config: Config) -> ExitCode {
    if config.watcher.dir.as_os_str().is_empty() {
        tracing::error!("watch requires a directory, pass --dir or set watcher.dir in the config");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let queue = match Database::new(&config.queue.db_path).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(error = %e, "failed to open queue database");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let pool = match PoolFacade::new(&config.servers).await {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::error!(error = %e, "failed to build provider pools");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let par2_executor = build_par2_executor(&config).await;
    let processor = Arc::new(Processor::new(pool, par2_executor, config.clone(), None));

    let mut watcher = match FolderWatcher::new(queue.clone(), config.watcher.clone()) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize folder watcher");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Err(e) = watcher.start() {
        tracing::error!(error = %e, "failed to start folder watcher");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let root_ctx = PausableContext::new();
    let watcher_handle = tokio::spawn(watcher.run(root_ctx.child()));

    let lease_ms = config.queue.lease_ms;
    let max_receives = config.queue.max_receives;
    let consumer_ctx = root_ctx.child();
    let consumer_queue = queue.clone();
    let consumer_processor = processor.clone();
    let consumer = tokio::spawn(async move {
        while !consumer_ctx.is_cancelled() {
            match consumer_queue.pop(lease_ms, max_receives).await {
                Ok(Some(row)) => {
                    let request: JobRequest = match serde_json::from_str(&row.body) {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::error!(job_id = %row.id, error = %e, "failed to deserialize queued job");
                            let _ = consumer_queue.fail(row.id, &format!("malformed job body: {e}")).await;
                            continue;
                        }
                    };

                    match consumer_processor.process(row.id, &request, consumer_ctx.child()).await {
                        Ok(outcome) if outcome.outcome.errors.is_empty() => {
                            let size: i64 = request
                                .paths
                                .iter()
                                .filter_map(|p| std::fs::metadata(p).ok())
                                .map(|m| m.len() as i64)
                                .sum();
                            let path = request.paths.first().map(|p| p.display().to_string()).unwrap_or_default();
                            let nzb_path = outcome.nzb_path.as_ref().map(|p| p.display().to_string());
                            if let Err(e) = consumer_queue.ack(&row, &path, size, nzb_path.as_deref()).await {
                                tracing::error!(job_id = %row.id, error = %e, "failed to ack completed job");
                            }
                        }
                        Ok(outcome) => {
                            let message =
                                outcome.outcome.errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; ");
                            let _ = consumer_queue.fail(row.id, &message).await;
                        }
                        Err(postie::Error::Cancelled) => break,
                        Err(e) => {
                            tracing::error!(job_id = %row.id, error = %e, "job failed");
                            let _ = consumer_queue.fail(row.id, &e.to_string()).await;
                        }
                    }
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                Err(e) => {
                    tracing::error!(error = %e, "failed to pop queue item");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    postie::wait_for_signal().await;
    tracing::info!("shutting down");
    root_ctx.cancel();

    let _ = watcher_handle.await;
    let _ = consumer.await;

    ExitCode::from(EXIT_CANCELLED)
}
