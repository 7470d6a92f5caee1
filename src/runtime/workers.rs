//! # Workers
//!
//! Pool of tasks that pull keys from the work queue and reconcile them.

use crate::controller::reconciler::{reconcile, ReconcileKey, Reconciler, ReconcilerError};
use crate::observability::metrics;
use crate::runtime::error_policy::{classify_reconcile_error, handle_reconciliation_error};
use crate::runtime::queue::{KeyOutcome, WorkQueue};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type ReconcileQueue = WorkQueue<ReconcileKey>;

/// Reconcile one key with a deadline and report the result to the queue
pub async fn process_key(queue: &Arc<ReconcileQueue>, ctx: &Reconciler, key: ReconcileKey) {
    let timeout = ctx.config.read().await.reconcile_timeout();
    let start = Instant::now();
    metrics::increment_reconciliations(key.kind());

    let result = match tokio::time::timeout(timeout, reconcile(ctx, &key)).await {
        Ok(result) => result,
        Err(_) => Err(ReconcilerError::Timeout(timeout)),
    };
    metrics::observe_reconcile_duration(key.kind(), start.elapsed().as_secs_f64());

    match result {
        Ok(action) => {
            for follow_up in action.follow_ups {
                queue.add(follow_up);
            }
            let outcome = match action.requeue_after {
                Some(delay) => KeyOutcome::RequeueAfter(delay),
                None => KeyOutcome::Converged,
            };
            queue.done(&key, outcome);
            debug!(key = %key, elapsed_ms = start.elapsed().as_millis(), "reconciliation.success");
        }
        Err(e) => {
            let disposition = queue.done(&key, classify_reconcile_error(&e));
            handle_reconciliation_error(&key, &e, disposition);
        }
    }
}

async fn run_worker(id: usize, queue: Arc<ReconcileQueue>, ctx: Reconciler) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.next().await {
        process_key(&queue, &ctx, key).await;
    }
    debug!(worker = id, "Worker stopped");
}

/// Start `count` workers; they exit once the queue is shut down
pub fn spawn_workers(
    count: usize,
    queue: &Arc<ReconcileQueue>,
    ctx: &Reconciler,
) -> Vec<JoinHandle<()>> {
    let count = count.max(1);
    info!("Starting {} reconcile workers", count);
    (0..count)
        .map(|id| tokio::spawn(run_worker(id, Arc::clone(queue), ctx.clone())))
        .collect()
}
