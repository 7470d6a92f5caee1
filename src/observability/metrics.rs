//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `secret_share_reconciliations_total{kind}` - Total number of reconcile passes
//! - `secret_share_reconcile_errors_total{kind,error}` - Total number of failed passes
//! - `secret_share_reconcile_duration_seconds{kind}` - Duration of reconcile passes
//! - `secret_share_copies_written_total{outcome}` - Secret copies created or updated
//! - `secret_share_copies_deleted_total` - Secret copies deleted
//! - `secret_share_queue_depth` - Keys waiting in the work queue
//! - `secret_share_requeues_total{reason}` - Keys scheduled for another pass
//! - `secret_share_keys_dropped_total{kind}` - Keys given up after too many failures
//! - `secret_share_authorized_namespaces{namespace,export}` - Size of each export's authorized set
//! - `secret_share_watch_restarts_total{resource}` - Watch streams restarted after an error

use anyhow::Result;
use prometheus::core::Collector;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secret_share_reconciliations_total",
            "Total number of reconcile passes",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secret_share_reconcile_errors_total",
            "Total number of failed reconcile passes",
        ),
        &["kind", "error"],
    )
    .expect("Failed to create RECONCILE_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "secret_share_reconcile_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILE_DURATION metric - this should never happen")
});

static COPIES_WRITTEN_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secret_share_copies_written_total",
            "Total number of secret copies created or updated",
        ),
        &["outcome"],
    )
    .expect("Failed to create COPIES_WRITTEN_TOTAL metric - this should never happen")
});

static COPIES_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secret_share_copies_deleted_total",
        "Total number of secret copies deleted",
    )
    .expect("Failed to create COPIES_DELETED_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secret_share_queue_depth",
        "Number of keys waiting in the work queue",
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secret_share_requeues_total",
            "Total number of keys scheduled for another pass",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static KEYS_DROPPED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secret_share_keys_dropped_total",
            "Total number of keys given up after exhausting retries or failing permanently",
        ),
        &["kind"],
    )
    .expect("Failed to create KEYS_DROPPED_TOTAL metric - this should never happen")
});

static AUTHORIZED_NAMESPACES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "secret_share_authorized_namespaces",
            "Number of namespaces each SecretExport authorizes",
        ),
        &["namespace", "export"],
    )
    .expect("Failed to create AUTHORIZED_NAMESPACES metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secret_share_watch_restarts_total",
            "Total number of watch streams restarted after an error or end of stream",
        ),
        &["resource"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

fn register<C: Collector + Clone + 'static>(collector: &C) -> Result<()> {
    match REGISTRY.register(Box::new(collector.clone())) {
        // Registering twice (tests, re-initialisation) is harmless
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn register_metrics() -> Result<()> {
    register(&*RECONCILIATIONS_TOTAL)?;
    register(&*RECONCILE_ERRORS_TOTAL)?;
    register(&*RECONCILE_DURATION)?;
    register(&*COPIES_WRITTEN_TOTAL)?;
    register(&*COPIES_DELETED_TOTAL)?;
    register(&*QUEUE_DEPTH)?;
    register(&*REQUEUES_TOTAL)?;
    register(&*KEYS_DROPPED_TOTAL)?;
    register(&*AUTHORIZED_NAMESPACES)?;
    register(&*WATCH_RESTARTS_TOTAL)?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconcile_errors(kind: &str, error: &str) {
    RECONCILE_ERRORS_TOTAL.with_label_values(&[kind, error]).inc();
}

pub fn observe_reconcile_duration(kind: &str, duration: f64) {
    RECONCILE_DURATION.with_label_values(&[kind]).observe(duration);
}

pub fn increment_copies_written(outcome: &str) {
    COPIES_WRITTEN_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_copies_deleted() {
    COPIES_DELETED_TOTAL.inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_keys_dropped(kind: &str) {
    KEYS_DROPPED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn set_authorized_namespaces(namespace: &str, export: &str, count: usize) {
    AUTHORIZED_NAMESPACES
        .with_label_values(&[namespace, export])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Drop the gauge series of a deleted SecretExport
pub fn remove_authorized_namespaces(namespace: &str, export: &str) {
    // Absent when the export was deleted before its first pass
    let _ = AUTHORIZED_NAMESPACES.remove_label_values(&[namespace, export]);
}

pub fn increment_watch_restarts(resource: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[resource]).inc();
}
