use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipes_demo::{registry, PipedObject, PipedObjects};
use pipes_engine::{EnvelopeCodec, PipesConfig, PoolSettings, Worker, WorkerPool};
use pipes_store::{PgStore, PgTaskQueue, TaskQueue};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipes-demo", about = "Counter pipe running against Postgres")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the embedded migrations
    Migrate,

    /// Run the worker pool until Ctrl+C
    Work,

    /// Process everything currently queued, then exit
    Drain,

    /// Create or update a piped object
    Save {
        #[arg(long)]
        id: i64,

        /// "group-a", "group-b", or anything else for an ungrouped object
        #[arg(long)]
        group: Option<String>,

        /// Counter the object feeds
        #[arg(long)]
        counter: Option<i64>,
    },

    /// Delete a piped object
    Remove {
        #[arg(long)]
        id: i64,
    },

    /// Print a counter
    Show {
        #[arg(long, default_value_t = pipes_demo::DEFAULT_COUNTER)]
        counter: i64,
    },

    /// List dead-lettered envelopes
    DeadLetters,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = PipesConfig::from_env()?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.worker_concurrency as u32 + 2)
        .connect(&database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let store = Arc::new(PgStore::new(pool));
    let queue = Arc::new(PgTaskQueue::new(store.pool().clone()));
    let codec = EnvelopeCodec::new();

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            tracing::info!("Migrations complete");
        }

        Commands::Work => {
            let pool = worker_pool(&config, store, queue, codec)?;
            let (stop, shutdown) = watch::channel(false);

            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => tracing::info!("Ctrl+C received, shutting down"),
                    Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl+C"),
                }
                let _ = stop.send(true);
            });

            pool.run(shutdown).await?;
        }

        Commands::Drain => {
            let stats = worker_pool(&config, store, queue, codec)?.drain().await?;
            tracing::info!(
                applied = stats.applied,
                duplicates = stats.duplicates,
                retried = stats.retried,
                dead_lettered = stats.dead_lettered,
                "Queue drained"
            );
        }

        Commands::Save { id, group, counter } => {
            let objects = PipedObjects::new(registry()?, store, queue, codec);
            let report = objects
                .save(PipedObject {
                    id,
                    group,
                    counter_id: counter,
                })
                .await?;
            tracing::info!(
                source = %report.source_id,
                version = report.marker.version,
                envelopes = report.queued.len(),
                "Saved piped object"
            );
        }

        Commands::Remove { id } => {
            let objects = PipedObjects::new(registry()?, store, queue, codec);
            match objects.remove(id).await? {
                Some(report) => tracing::info!(
                    source = %report.source_id,
                    version = report.marker.version,
                    "Removed piped object"
                ),
                None => tracing::warn!(id, "No such piped object"),
            }
        }

        Commands::Show { counter } => {
            let objects = PipedObjects::new(registry()?, store, queue, codec);
            let value = objects.counter(counter).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Commands::DeadLetters => {
            for task in queue.dead_letters().await? {
                println!(
                    "{}\t{}\t{}",
                    task.id,
                    task.attempts,
                    task.last_error.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

fn worker_pool(
    config: &PipesConfig,
    store: Arc<PgStore>,
    queue: Arc<PgTaskQueue>,
    codec: EnvelopeCodec,
) -> Result<WorkerPool<Arc<PgStore>, Arc<PgTaskQueue>>> {
    let worker =
        Worker::new(registry()?, store, codec).with_commit_attempts(config.commit_attempts);
    Ok(WorkerPool::new(worker, queue, PoolSettings::from(config)))
}
