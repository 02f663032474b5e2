#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, RunConfig};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use taskpool::{EnvConfig, PoolOptions, TaskPool};
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(args)?;

    init_telemetry()?;

    let mut options = PoolOptions::new()
        .with_config(Arc::new(EnvConfig::new()))
        .with_span(tracing::info_span!("taskpool"));
    if let Some(workers) = config.workers {
        options = options.with_size(workers);
    }
    let pool = TaskPool::shared(options);
    log_startup_info(pool, &config);

    pool.start().await?;

    let completed = Arc::new(AtomicUsize::new(0));
    tokio::select! {
        res = submit_batch(pool, &config, Arc::clone(&completed)) => res?,
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received, terminating gracefully...");
        }
    }

    // Waits for every accepted job.
    pool.stop().await?;

    tracing::info!(
        "Completed {}/{} jobs",
        completed.load(Ordering::Acquire),
        config.jobs
    );
    Ok(())
}

async fn submit_batch(
    pool: &'static TaskPool,
    config: &RunConfig,
    completed: Arc<AtomicUsize>,
) -> taskpool::Result<()> {
    for index in 0..config.jobs {
        let completed = Arc::clone(&completed);
        let duration = config.job_duration;

        if config.blocking {
            pool.submit_fn(move || {
                std::thread::sleep(duration);
                completed.fetch_add(1, Ordering::AcqRel);
                tracing::info!(
                    "Blocking job {index} finished ({} workers busy)",
                    pool.concurrency()
                );
            })
            .await?;
        } else {
            pool.submit(move || async move {
                tokio::time::sleep(duration).await;
                completed.fetch_add(1, Ordering::AcqRel);
                tracing::info!(
                    "Job {index} finished ({} workers busy)",
                    pool.concurrency()
                );
            })
            .await?;
        }

        tracing::debug!("Submitted job {index}");
    }

    tracing::info!("All {} jobs submitted", config.jobs);
    Ok(())
}

fn log_startup_info(pool: &TaskPool, config: &RunConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting {} workers with full config: {:#?}",
            pool.size(),
            config
        );
    } else {
        tracing::info!(
            "Starting {} workers for {} jobs",
            pool.size(),
            config.jobs
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
