//! Task queue worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskq_queue::RedisJobStore;
use taskq_worker::{JobExecutor, WorkerConfig, WorkerError};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Required for rediss:// connections
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting taskq-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
        info!("Serving worker metrics on {}", addr);
    }

    let store = RedisJobStore::from_env().context("failed to create job store")?;
    let registry = taskq_tasks::default_registry().context("failed to build task registry")?;

    let shutdown_timeout = config.shutdown_timeout;
    let executor = Arc::new(JobExecutor::new(config, Arc::new(store), Arc::new(registry)));

    let mut worker = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.run().await }
    });

    tokio::select! {
        result = &mut worker => {
            result.context("executor task failed")??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, finishing in-flight job");
            executor.shutdown();
        }
    }

    match tokio::time::timeout(shutdown_timeout, worker).await {
        Ok(result) => result.context("executor task failed")??,
        Err(_) => warn!(
            "In-flight job did not finish within {:?}; it stays running",
            shutdown_timeout
        ),
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("taskq=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}
