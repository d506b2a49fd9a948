// src/main.rs
// Backtest worker service entry point. Spawns a pool of workers against
// either the Redis-backed queue or the in-process one.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zone_backtester::queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
use zone_backtester::store::{BarSource, InMemoryBarSource, InMemoryRunStore, RunStore};
use zone_backtester::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "zone_backtester", about = "Supply/demand zone backtest worker")]
struct Args {
    /// Number of worker tasks to run.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Redis connection URL. Falls back to REDIS_URL, then to the in-process
    /// queue when neither is set.
    #[arg(long)]
    redis_url: Option<String>,

    /// Seconds each worker blocks waiting for a job before polling again.
    #[arg(long, default_value_t = 5)]
    dequeue_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let redis_url = args
        .redis_url
        .or_else(|| std::env::var("REDIS_URL").ok());

    let queue: Arc<dyn JobQueue> = match redis_url {
        Some(url) => match RedisJobQueue::connect(&url).await {
            Ok(q) => {
                info!(url = %url, "connected to redis queue");
                Arc::new(q)
            }
            Err(e) => {
                error!(error = %e, "failed to connect to redis");
                std::process::exit(1);
            }
        },
        None => {
            info!("no redis url configured, using in-process queue");
            Arc::new(MemoryJobQueue::new())
        }
    };

    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    let bars: Arc<dyn BarSource> = Arc::new(InMemoryBarSource::new());
    let dequeue_timeout = Duration::from_secs(args.dequeue_timeout_secs);

    info!(workers = args.workers, "starting worker pool");
    let mut handles = Vec::with_capacity(args.workers);
    for n in 0..args.workers {
        let worker = Worker::new(
            format!("worker-{}", n + 1),
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&bars),
            dequeue_timeout,
        );
        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "error waiting for shutdown signal");
    }
    info!("shutting down");
    for handle in &handles {
        handle.abort();
    }
}
