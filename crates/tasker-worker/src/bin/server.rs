//! # Tasker Worker Server
//!
//! Thin wrapper binary for running the composition root as a standalone
//! server: HTTP ingress, dispatch loop, and cron tick loop each spawned
//! as their own task, torn down together on Ctrl+C/SIGTERM.

use std::env;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tasker_shared::RuntimeConfig;
use tasker_worker::http::{self, Metrics};
use tasker_worker::Runtime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tasker_worker=info".parse()?))
        .init();

    info!("Starting Tasker Worker...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("TASKER_CONFIG_PATH").ok();
    let config = RuntimeConfig::load(config_path.as_deref())?;
    let bind_addr = env::var("TASKER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let runtime = Runtime::build(config)?;
    let metrics = Arc::new(Metrics::default());

    let (worker_shutdown_tx, worker_shutdown_rx) = tokio::sync::oneshot::channel();
    let (cron_shutdown_tx, cron_shutdown_rx) = tokio::sync::oneshot::channel();

    let worker_runtime = runtime.clone();
    let worker_task = tokio::spawn(async move {
        worker_runtime.run_worker_pool(worker_shutdown_rx).await;
    });

    let cron_runtime = runtime.clone();
    let cron_task = tokio::spawn(async move {
        cron_runtime.run_cron_loop(cron_shutdown_rx).await;
    });

    let app = http::router(runtime.clone(), metrics);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "HTTP ingress listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Press Ctrl+C to shutdown gracefully");
    if let Err(err) = server.await {
        error!(%err, "HTTP server exited with error");
    }

    info!("Shutdown signal received, stopping dispatch loops...");
    let _ = worker_shutdown_tx.send(());
    let _ = cron_shutdown_tx.send(());

    if let Err(err) = worker_task.await {
        error!(%err, "worker pool task panicked");
    }
    if let Err(err) = cron_task.await {
        error!(%err, "cron dispatcher task panicked");
    }

    info!("Tasker Worker shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
