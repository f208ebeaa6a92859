use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prewarm::config::Config;
use prewarm::metrics;
use prewarm::queue::{Hook, JobQueue, SqliteJobQueue};
use prewarm::scheduler::IntervalRegistry;
use prewarm::storage::{SqliteConfigStore, SqliteVisitLog, VisitLog};
use prewarm::utils::now_timestamp;
use prewarm::warmer::create_chunks;
use prewarm::worker::{Dispatcher, Worker};

#[derive(Parser)]
#[command(
    name = "prewarm",
    version,
    about = "Drift-free cache warming scheduler with remote warmer dispatch",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// TOML config file (environment variables are used otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the configured one
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a local warm-up run
    Start,

    /// Ask a running local warm-up to stop
    Stop,

    /// Mark intervals for scheduling on the next worker start
    Activate,

    /// Cancel every pending interval, chunk and sweep job
    Deactivate,

    /// Re-create missing intervals now and make sure the sweep exists
    Sweep,

    /// Drop external intervals and schedule them again from settings
    Reschedule,

    /// Enqueue warm chunks for a domain
    Chunks {
        /// Domain whose recorded requests are chunked
        domain: String,
    },

    /// Change the local warm-up interval
    SetInterval {
        /// Interval in minutes (0 disables)
        minutes: i64,
    },

    /// Run the queue worker until interrupted
    Worker,

    /// Show queue and visit log status
    Status {
        /// Number of recent visits to show
        #[arg(short, long, default_value = "10")]
        recent: usize,
    },

    /// Print Prometheus metrics
    Metrics,
}

/// Stores opened on the configured database
struct App {
    config: Config,
    store: Arc<SqliteConfigStore>,
    queue: Arc<SqliteJobQueue>,
    log: Arc<SqliteVisitLog>,
}

impl App {
    fn open(config_path: Option<PathBuf>, database: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Config::from_file(&path)?,
            None => Config::from_env()?,
        };
        if let Some(database) = database {
            config.database.sqlite_path = database;
        }
        config.validate()?;

        let path = config.database.sqlite_path.clone();
        let store = SqliteConfigStore::new(&path)
            .with_context(|| format!("Failed to open option store: {}", path.display()))?;
        let queue = SqliteJobQueue::new(&path)
            .with_context(|| format!("Failed to open job queue: {}", path.display()))?;
        let log = SqliteVisitLog::new(&path)
            .with_context(|| format!("Failed to open visit log: {}", path.display()))?;

        Ok(Self {
            config,
            store: Arc::new(store),
            queue: Arc::new(queue),
            log: Arc::new(log),
        })
    }

    fn registry(&self) -> IntervalRegistry {
        IntervalRegistry::new(self.queue.clone(), self.store.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    let app = App::open(cli.config, cli.database)?;

    match cli.command {
        Commands::Start => {
            let id = app.queue.enqueue_now(Hook::StartWarmUp, &[])?;
            tracing::info!(job_id = id, "Local warm-up enqueued");
            println!("Warm-up enqueued (job {id})");
        }

        Commands::Stop => {
            let id = app.queue.enqueue_now(Hook::StopWarmUp, &[])?;
            tracing::info!(job_id = id, "Stop request enqueued");
            println!("Stop requested (job {id})");
        }

        Commands::Activate => {
            if app.registry().activate()? {
                println!("Activated. Intervals are scheduled on the next worker start.");
            } else {
                println!("Already activated.");
            }
        }

        Commands::Deactivate => {
            let canceled = app.registry().deactivate()?;
            println!("Canceled {canceled} pending jobs");
        }

        Commands::Sweep => {
            let now = now_timestamp();
            let registry = app.registry();
            registry.fix_missing_intervals(now)?;
            registry.schedule_sweep(now)?;
            println!("Intervals checked");
        }

        Commands::Reschedule => {
            let results = app.registry().reschedule_external(now_timestamp())?;
            for result in results {
                println!("  {}: {:?}", result.domain, result.outcome);
            }
        }

        Commands::Chunks { domain } => {
            let count = create_chunks(app.store.as_ref(), app.queue.as_ref(), &domain)?;
            println!("Enqueued {count} chunks for {domain}");
        }

        Commands::SetInterval { minutes } => {
            let outcome = app
                .registry()
                .handle_interval_change(minutes, now_timestamp())?;
            println!("Local interval set to {minutes} minutes: {outcome:?}");
        }

        Commands::Worker => run_worker(app).await?,

        Commands::Status { recent } => status(&app, recent)?,

        Commands::Metrics => {
            metrics::init_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;
            metrics::update_pending_jobs(app.queue.stats()?.pending);
            let output = metrics::encode_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;
            print!("{output}");
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("prewarm=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("prewarm=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn run_worker(app: App) -> Result<()> {
    metrics::init_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;

    let dispatcher = Dispatcher::new(
        app.store.clone(),
        app.queue.clone(),
        app.log.clone(),
        &app.config.http,
    )?;
    let worker = Worker::new(app.queue.clone(), Arc::new(dispatcher), app.config.worker.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping worker");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await?;
    Ok(())
}

fn status(app: &App, recent: usize) -> Result<()> {
    let stats = app.queue.stats()?;
    println!("Queue:");
    println!("  Pending:  {}", stats.pending);
    println!("  Running:  {}", stats.running);
    println!("  Complete: {}", stats.complete);
    println!("  Failed:   {}", stats.failed);
    println!("  Canceled: {}", stats.canceled);

    let pending = app.queue.pending_jobs()?;
    if !pending.is_empty() {
        println!("\nScheduled:");
        for job in pending {
            let at = chrono::DateTime::from_timestamp(job.run_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| job.run_at.to_string());
            println!("  {at}  {}  {}", job.hook, serde_json::to_string(&job.args)?);
        }
    }

    let visits = app.log.stats()?;
    println!("\nVisits:");
    println!("  Total:   {}", visits.total);
    println!("  Success: {}", visits.success);
    println!("  Failed:  {}", visits.failed);
    println!("  Rate:    {:.1}%", visits.success_rate() * 100.0);

    for entry in app.log.recent(recent)? {
        let marker = if entry.outcome.is_success() { "ok" } else { "FAIL" };
        println!(
            "  {}  {:4}  {}",
            entry.logged_at.format("%Y-%m-%d %H:%M:%S"),
            marker,
            entry.outcome.subject()
        );
    }

    Ok(())
}
