//! hbqueue command line
//!
//! Manages the persistent encode queue and runs it through HandBrakeCLI.
//!
//! ```bash
//! hbqueue add --source movie.mkv --dest movie.mp4
//! hbqueue list
//! hbqueue run --status-port 7878
//! ```

mod render;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hbqueue::{
    generate_query, new_shared_status, parse_query, record_events, run_startup_checks,
    run_status_server, Config, DefaultEngineFactory, EncodeTask, JobQueue, QueryOptions,
    QueueRunner, RunnerSettings,
};

/// Persistent HandBrake encode queue
#[derive(Parser, Debug)]
#[command(name = "hbqueue")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "hbqueue.toml", env = "HBQUEUE_CONFIG", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue an encode
    Add {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        dest: PathBuf,
        /// Title to encode (0 for the engine's default)
        #[arg(short, long, default_value_t = 0)]
        title: u32,
        /// Use this query instead of generating one
        #[arg(short, long, allow_hyphen_values = true)]
        query: Option<String>,
        /// Queue even if another job already writes to the destination
        #[arg(long)]
        allow_duplicate: bool,
    },
    /// Show pending jobs
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove the job at an index
    Remove { index: usize },
    /// Move the job at an index one place earlier
    MoveUp { index: usize },
    /// Move the job at an index one place later
    MoveDown { index: usize },
    /// Remove every pending job
    Clear,
    /// Append jobs from another queue file
    Import { path: PathBuf },
    /// Save the pending jobs to a queue file for a later import
    Export { path: PathBuf },
    /// Write the pending jobs as a shell command line
    ExportBatch { path: PathBuf },
    /// Print the structured form of a query as JSON
    Parse { query: String },
    /// Print the query for a JSON-encoded encode task
    Generate { task: PathBuf },
    /// Run the queue until it is empty
    Run {
        /// Serve GET /status on 127.0.0.1 at this port
        #[arg(long)]
        status_port: Option<u16>,
        /// Skip the encoder availability check
        #[arg(long)]
        skip_checks: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match &cli.command {
        Command::Parse { query } => {
            println!("{}", serde_json::to_string_pretty(&parse_query(query))?);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Generate { task } => {
            let json = fs::read_to_string(task)
                .with_context(|| format!("reading {}", task.display()))?;
            let task: EncodeTask = serde_json::from_str(&json).context("parsing encode task")?;
            println!("{}", generate_query(&task));
            return Ok(ExitCode::SUCCESS);
        }
        Command::Clear => {
            // clearing must work even when the recovery file is unreadable
            JobQueue::new(&config.queue.recovery_file).clear();
            println!("queue cleared");
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let queue = JobQueue::new(&config.queue.recovery_file);
    queue
        .load_from_file()
        .context("restoring queue (use `hbqueue clear` to discard it)")?;

    match cli.command {
        Command::Add {
            source,
            dest,
            title,
            query,
            allow_duplicate,
        } => {
            if !allow_duplicate && queue.check_for_duplicate_destination(&dest) {
                bail!(
                    "a queued job already writes to {} (pass --allow-duplicate to queue anyway)",
                    dest.display()
                );
            }
            let id = match query {
                Some(query) => queue.add_with(query, source, dest, title, true),
                None => queue.add_task(
                    &EncodeTask::new(source, dest, title),
                    &QueryOptions::from_engine_config(&config.engine),
                ),
            };
            println!("queued job #{id}");
        }
        Command::List { json } => {
            let jobs = queue.jobs();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("queue is empty");
            } else {
                for (index, job) in jobs.iter().enumerate() {
                    println!("{}", render::job_line(index, job));
                }
            }
        }
        Command::Remove { index } => match queue.remove(index) {
            Some(job) => println!("removed job #{}", job.id),
            None => warn!(index, "no job at that index"),
        },
        Command::MoveUp { index } => queue.move_up(index),
        Command::MoveDown { index } => queue.move_down(index),
        Command::Import { path } => {
            let count = queue.import(&path)?;
            println!("imported {count} jobs");
        }
        Command::Export { path } => {
            let count = queue.export(&path)?;
            println!("exported {count} jobs to {}", path.display());
        }
        Command::ExportBatch { path } => {
            queue.export_batch_script(&path, &config.engine.cli_path)?;
            println!("wrote {}", path.display());
        }
        Command::Run {
            status_port,
            skip_checks,
        } => return run_queue(config, queue, status_port, skip_checks).await,
        Command::Parse { .. } | Command::Generate { .. } | Command::Clear => {}
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_queue(
    config: Config,
    queue: JobQueue,
    status_port: Option<u16>,
    skip_checks: bool,
) -> Result<ExitCode> {
    if skip_checks {
        warn!("skipping startup checks");
    } else {
        run_startup_checks(&config, false).await?;
    }

    let queue = Arc::new(queue);
    let factory = Arc::new(DefaultEngineFactory::new(config.clone()));
    let runner = QueueRunner::new(queue.clone(), factory, RunnerSettings::from_config(&config));

    let status = new_shared_status();
    tokio::spawn(record_events(runner.subscribe(), status.clone(), queue.clone()));
    if let Some(port) = status_port {
        let status = status.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(status, port).await {
                error!("status server error: {}", e);
            }
        });
    }

    let mut events = runner.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", render::event_line(&event));
        }
    });

    let Some(mut handle) = runner.start() else {
        println!("queue is empty");
        return Ok(ExitCode::SUCCESS);
    };

    let summary = tokio::select! {
        summary = &mut handle => summary?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping queue");
            runner.stop().await;
            handle.await?
        }
    };

    println!("{}", render::summary_line(&summary));
    if summary.failed > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
