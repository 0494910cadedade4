//! Snapshot Mover Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! registers CRD controllers, and runs the reconciliation loops.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use snapshot_mover_operator::{
    config::{Args, OperatorConfig},
    controllers::{self, Context},
    metrics,
};

/// How long controllers get to finish in-flight reconciliations on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    init_tracing();

    info!("Starting Snapshot Mover Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Create shared context
    let shutdown = CancellationToken::new();
    let context = Arc::new(Context::new(
        client.clone(),
        OperatorConfig::from(&args),
        shutdown.clone(),
    ));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(args.metrics_port));
    info!("Metrics server starting on port {}", args.metrics_port);

    // Run all controllers concurrently
    let mut backup_controller = tokio::spawn(controllers::run_backup_controller(
        client.clone(),
        context.clone(),
    ));
    let mut restore_controller = tokio::spawn(controllers::run_restore_controller(
        client.clone(),
        context.clone(),
    ));

    // Handle graceful shutdown
    tokio::select! {
        _ = &mut backup_controller => {
            error!("Backup controller exited unexpectedly");
        }
        _ = &mut restore_controller => {
            error!("Restore controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = backup_controller.await;
        let _ = restore_controller.await;
    })
    .await;
    if drained.is_err() {
        warn!("Controllers did not stop within {:?}", SHUTDOWN_GRACE);
    }

    info!("Snapshot Mover Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
