//! # Runtime
//!
//! Controller runtime: initialization, watch streams, the work queue and its workers,
//! and shutdown handling.

pub mod error_policy;
pub mod initialization;
pub mod queue;
pub mod watch_loop;
pub mod workers;

use crate::runtime::initialization::InitializationResult;
use crate::runtime::queue::{RetryPolicy, WorkQueue};
use crate::runtime::watch_loop::{run_resync_loop, start_watches, EventDispatcher};
use crate::runtime::workers::spawn_workers;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Run the controller until SIGINT/SIGTERM
///
/// Workers start only after the namespace index finished its initial list, so no
/// authorization decision is taken against a partial view of the cluster.
pub async fn run(init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
        ..
    } = init;

    let (policy, workers, resync_interval) = {
        let config = controller_config.read().await;
        (
            RetryPolicy {
                backoff_start: config.backoff_start_duration(),
                backoff_max: config.backoff_max_duration(),
                max_retries: config.max_reconcile_retries,
            },
            config.max_concurrent_reconciliations,
            config.resync_interval(),
        )
    };

    let queue = WorkQueue::new(policy);
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&queue),
        reconciler.namespaces.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut watch_handles = start_watches(&client, &dispatcher, &controller_config, &shutdown_rx);
    watch_handles.push(tokio::spawn(run_resync_loop(
        Arc::clone(&dispatcher),
        Arc::clone(&reconciler.store),
        resync_interval,
        shutdown_rx.clone(),
    )));

    info!("Waiting for the namespace index to sync...");
    tokio::select! {
        () = reconciler.namespaces.wait_synced() => {
            info!(
                namespaces = reconciler.namespaces.len().await,
                "Namespace index synced"
            );
        }
        () = shutdown_signal() => {
            info!("Shutdown requested before the namespace index synced");
            stop(&shutdown_tx, &queue, watch_handles, Vec::new()).await;
            return Ok(());
        }
    }

    match dispatcher.resync(reconciler.store.as_ref()).await {
        Ok(count) => info!(keys = count, "Initial resync enqueued keys"),
        Err(e) => warn!(error = %e, "Initial resync failed, waiting for watch events"),
    }

    let worker_handles = spawn_workers(workers, &queue, &reconciler);
    server_state.set_ready(true);
    info!("Controller is ready");

    shutdown_signal().await;

    info!("Shutting down controller...");
    server_state.set_ready(false);
    stop(&shutdown_tx, &queue, watch_handles, worker_handles).await;
    info!("Controller stopped");
    Ok(())
}

async fn stop(
    shutdown_tx: &watch::Sender<bool>,
    queue: &Arc<workers::ReconcileQueue>,
    watch_handles: Vec<tokio::task::JoinHandle<()>>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = shutdown_tx.send(true);
    queue.shutdown();
    for handle in worker_handles.into_iter().chain(watch_handles) {
        if let Err(e) = handle.await {
            error!("Task failed during shutdown: {}", e);
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
