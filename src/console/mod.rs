//! Command-line surface
//!
//! | Command | Effect |
//! |---|---|
//! | `queue:listen` | run the [`Manager`] for a channel; exits 1 if one is already running |
//! | `queue:status` | print the status tuple |
//! | `queue:clear` | wipe the channel after confirmation (`--force` skips it) |
//! | `queue:run` | execute one reserved id, the body of a single-process job |
//! | `queue:failed` | list dead letters with their diagnostics |
//! | `queue:reload-failed` | move one or every failed job back to delayed |
//! | `worker:reload` | SIGUSR1 to the listener: drain workers and start fresh ones |
//! | `worker:stop` | SIGTERM to the listener |
//!
//! `worker:run` is hidden; supervised children are started with it.
//!
//! Applications embed the CLI by registering their jobs on an
//! [`Application`]:
//!
//! ```rust,ignore
//! use aint_queue::console::{Application, init_tracing};
//! use aint_queue::{JobCapability, JobRegistry};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     init_tracing();
//!     let mut registry = JobRegistry::new();
//!     registry.register_callable("ping", JobCapability::CoroutineSafe, |_| async { Ok(()) });
//!     Application::new(registry).main().await
//! }
//! ```

use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::processing::control::WORKER_ERROR_EXIT;
use crate::processing::os::send_signal;
use crate::processing::{
    JobExecutor, Manager, PidFile, SnapshotHandler, WorkerDirector, WorkerKind, WorkerRuntime,
    WorkerSignal,
};
use crate::serializer::JobRegistry;
use crate::storage::{Queue, RedisQueue, Settings};

#[derive(Parser, Debug)]
#[command(name = "aint-queue", about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ChannelArgs {
    /// Channel to operate on
    #[arg(long, default_value = "default")]
    pub channel: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the listener for a channel
    #[command(name = "queue:listen")]
    Listen(ChannelArgs),

    /// Print waiting, reserved, delayed, done, failed and total counts
    #[command(name = "queue:status")]
    Status(ChannelArgs),

    /// Delete every key of a channel
    #[command(name = "queue:clear")]
    Clear {
        #[command(flatten)]
        channel: ChannelArgs,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Execute one reserved job
    #[command(name = "queue:run")]
    Run {
        #[command(flatten)]
        channel: ChannelArgs,
        #[arg(long)]
        id: u64,
    },

    /// List failed jobs
    #[command(name = "queue:failed")]
    Failed(ChannelArgs),

    /// Requeue failed jobs
    #[command(name = "queue:reload-failed")]
    ReloadFailed {
        #[command(flatten)]
        channel: ChannelArgs,
        /// Only this job; every failed job when omitted
        #[arg(long)]
        id: Option<u64>,
        /// Seconds before the job is runnable again
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },

    /// Drain the listener's workers and start fresh ones
    #[command(name = "worker:reload")]
    WorkerReload(ChannelArgs),

    /// Stop the listener
    #[command(name = "worker:stop")]
    WorkerStop(ChannelArgs),

    #[command(name = "worker:run", hide = true)]
    WorkerRun {
        #[command(flatten)]
        channel: ChannelArgs,
        #[arg(long)]
        kind: WorkerKind,
    },
}

/// Install the tracing subscriber used by the binary.
///
/// `RUST_LOG` filters (default `info`); `AINT_QUEUE_LOG_FORMAT=json` switches
/// to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("AINT_QUEUE_LOG_FORMAT").is_ok_and(|format| format == "json");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

/// Jobs and handlers known to this binary.
pub struct Application {
    registry: Arc<JobRegistry>,
    snapshot_handlers: Vec<Arc<dyn SnapshotHandler>>,
}

impl Application {
    pub fn new(registry: JobRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            snapshot_handlers: Vec::new(),
        }
    }

    pub fn with_snapshot_handler(mut self, handler: Arc<dyn SnapshotHandler>) -> Self {
        self.snapshot_handlers.push(handler);
        self
    }

    /// Parse the process arguments, run, and map the result to an exit code.
    pub async fn main(self) -> ExitCode {
        let cli = Cli::parse();
        match self.run(cli).await {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                error!("{}", e);
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        }
    }

    /// Run one command against settings from the environment.
    pub async fn run(self, cli: Cli) -> Result<u8> {
        let settings = Settings::from_env()?;
        self.run_with(cli, settings).await
    }

    pub async fn run_with(self, cli: Cli, settings: Settings) -> Result<u8> {
        match cli.command {
            Command::Listen(args) => {
                let settings = settings.for_channel(&args.channel);
                let queue = self.connect(&settings, &args.channel).await?;
                let director = WorkerDirector::from_config(Arc::clone(&queue), &settings.manager.workers)?;

                let mut manager = Manager::new(settings.manager, queue, Arc::clone(&self.registry), director);
                for handler in self.snapshot_handlers {
                    manager = manager.with_snapshot_handler(handler);
                }
                manager.listen().await?;
                Ok(0)
            }
            Command::Status(args) => {
                let queue = self.connect(&settings, &args.channel).await?;
                let status = queue.status().await?;
                println!("channel   {}", args.channel);
                println!("waiting   {}", status.waiting);
                println!("reserved  {}", status.reserved);
                println!("delayed   {}", status.delayed);
                println!("done      {}", status.done);
                println!("failed    {}", status.failed);
                println!("total     {}", status.total);
                Ok(0)
            }
            Command::Clear { channel, force } => {
                if !force && !confirm(&format!("Clear every job in channel '{}'?", channel.channel)).await? {
                    println!("Aborted");
                    return Ok(1);
                }
                let queue = self.connect(&settings, &channel.channel).await?;
                queue.clear().await?;
                info!("Cleared channel '{}'", channel.channel);
                Ok(0)
            }
            Command::Run { channel, id } => {
                let queue = self.connect(&settings, &channel.channel).await?;
                let executor = JobExecutor::new(queue, Arc::clone(&self.registry));
                let outcome = executor.execute(id).await?;
                info!("Job {} outcome: {:?}", id, outcome);
                Ok(0)
            }
            Command::Failed(args) => {
                let queue = self.connect(&settings, &args.channel).await?;
                for failed in queue.get_failed().await? {
                    match failed.diagnostic() {
                        Some(d) => println!(
                            "{}\t{}\t{}\tattempts={}",
                            failed.id, d.last_error, d.last_error_message, d.attempts
                        ),
                        None => println!("{}\t{}", failed.id, failed.payload),
                    }
                }
                Ok(0)
            }
            Command::ReloadFailed { channel, id, delay } => {
                let queue = self.connect(&settings, &channel.channel).await?;
                let ids = match id {
                    Some(id) => vec![id],
                    None => queue.get_failed().await?.into_iter().map(|f| f.id).collect(),
                };
                let mut reloaded = 0;
                for id in ids {
                    if queue.reload_failed(id, Duration::from_secs(delay)).await? {
                        reloaded += 1;
                    }
                }
                println!("Reloaded {} failed jobs", reloaded);
                Ok(0)
            }
            Command::WorkerReload(args) => signal_listener(&settings, &args.channel, WorkerSignal::Reload),
            Command::WorkerStop(args) => signal_listener(&settings, &args.channel, WorkerSignal::Terminate),
            Command::WorkerRun { channel, kind } => {
                let result = self.run_worker(&settings, &channel.channel, kind).await;
                Ok(worker_exit_code(result))
            }
        }
    }

    async fn run_worker(&self, settings: &Settings, channel: &str, kind: WorkerKind) -> Result<i32> {
        let queue = self.connect(settings, channel).await?;
        let executor = Arc::new(JobExecutor::new(queue, Arc::clone(&self.registry)));
        let runtime = WorkerRuntime::new(kind, executor, settings.manager.workers.clone());
        runtime.control().listen_for_signals()?;
        runtime.run().await
    }

    async fn connect(&self, settings: &Settings, channel: &str) -> Result<Arc<dyn Queue>> {
        let queue = RedisQueue::connect(&settings.redis, channel).await?;
        Ok(Arc::new(queue))
    }
}

/// Exit code of a `worker:run` child. An error must not read as exit 1,
/// which the supervisor takes as a deliberate stop and never replaces.
fn worker_exit_code(result: Result<i32>) -> u8 {
    match result {
        Ok(code) => u8::try_from(code).unwrap_or(WORKER_ERROR_EXIT),
        Err(e) => {
            error!("Worker stopped on error: {}", e);
            WORKER_ERROR_EXIT
        }
    }
}

fn signal_listener(settings: &Settings, channel: &str, signal: WorkerSignal) -> Result<u8> {
    match PidFile::running_pid(&settings.manager.pid_path, channel)? {
        Some(pid) => {
            send_signal(pid, signal)?;
            println!("Sent {:?} to listener {} of channel '{}'", signal, pid, channel);
            Ok(0)
        }
        None => {
            println!("No listener is running for channel '{}'", channel);
            Ok(1)
        }
    }
}

async fn confirm(question: &str) -> Result<bool> {
    println!("{} [y/N]", question);
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
