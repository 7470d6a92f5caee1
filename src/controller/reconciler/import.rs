//! # Import Reconciliation
//!
//! Resolves one SecretImport against its export, converges the Secret copy, and records
//! the result on the import's status.

use crate::controller::binder::{self, Binding, UnboundReason};
use crate::controller::reconciler::status::{
    build_status, update_status_if_changed, ReadyReason, StatusTarget,
};
use crate::controller::reconciler::types::{ReconcileAction, Reconciler, ReconcilerError};
use crate::controller::syncer::{self, CopyTarget, SyncOutcome};
use crate::crd::SecretImport;
use crate::observability::metrics;
use crate::store::ObjectKey;
use kube::Resource;
use tracing::{debug, warn};

pub async fn reconcile_import(
    ctx: &Reconciler,
    key: &ObjectKey,
) -> Result<ReconcileAction, ReconcilerError> {
    let store = ctx.store.as_ref();

    let Some(import) = store.get_import(key).await? else {
        // The copy goes with the import even when garbage collection is not in play
        let target = CopyTarget::new(key.clone(), None);
        let outcome = syncer::converge(
            store,
            &target,
            &Binding::Unbound(UnboundReason::ImportDeleted),
        )
        .await?;
        record_outcome(outcome);
        return Ok(ReconcileAction::done());
    };

    if import.spec.from_namespace.trim().is_empty() {
        return reject_invalid(ctx, key, &import, "spec.fromNamespace must not be empty").await;
    }

    let binding = binder::resolve(key, &import, store, &ctx.namespaces).await?;
    let target = CopyTarget::new(key.clone(), import.controller_owner_ref(&()));
    let outcome = syncer::converge(store, &target, &binding).await?;
    record_outcome(outcome);

    let (reason, message) = describe(&binding, outcome);
    let desired = build_status(
        import.status.as_ref(),
        import.metadata.generation,
        reason,
        message,
    );
    update_status_if_changed(
        store,
        StatusTarget::Import,
        key,
        import.status.as_ref(),
        &desired,
    )
    .await?;

    if outcome == SyncOutcome::SourceMissing {
        let after = ctx.config.read().await.source_missing_requeue();
        debug!(
            resource.namespace = %key.namespace,
            resource.name = %key.name,
            requeue_after_secs = after.as_secs(),
            "Source secret missing, will check again"
        );
        metrics::increment_requeues("source-missing");
        return Ok(ReconcileAction::requeue(after));
    }

    Ok(ReconcileAction::done())
}

/// Status reason and message for a binding and the syncer's outcome
fn describe(binding: &Binding, outcome: SyncOutcome) -> (ReadyReason, String) {
    match (binding, outcome) {
        (Binding::Bound(pair), SyncOutcome::SourceMissing) => (
            ReadyReason::SourceMissing,
            format!("Source secret {} does not exist", pair.source),
        ),
        (Binding::Bound(_), SyncOutcome::ForeignSecret) => (
            ReadyReason::ForeignSecret,
            "A secret with this name exists and is not managed by this controller".to_string(),
        ),
        (Binding::Bound(pair), _) => (
            ReadyReason::Synced,
            format!("Imported secret from {}", pair.source),
        ),
        (Binding::Unbound(reason @ UnboundReason::NoSuchExport { .. }), _) => {
            (ReadyReason::NoSuchExport, reason.to_string())
        }
        (
            Binding::Unbound(
                reason @ UnboundReason::NotAuthorized {
                    selector_error: Some(_),
                    ..
                },
            ),
            _,
        ) => (ReadyReason::SelectorError, reason.to_string()),
        (Binding::Unbound(reason @ UnboundReason::NotAuthorized { .. }), _) => {
            (ReadyReason::NotAuthorized, reason.to_string())
        }
        (Binding::Unbound(reason), _) => (ReadyReason::InvalidSpec, reason.to_string()),
    }
}

/// Tear down any copy, record `InvalidSpec`, and fail the key permanently
async fn reject_invalid(
    ctx: &Reconciler,
    key: &ObjectKey,
    import: &SecretImport,
    reason: &str,
) -> Result<ReconcileAction, ReconcilerError> {
    let store = ctx.store.as_ref();
    warn!(
        resource.namespace = %key.namespace,
        resource.name = %key.name,
        reason,
        "Invalid SecretImport"
    );

    let unbound = Binding::Unbound(UnboundReason::InvalidImport(reason.to_string()));
    let outcome = syncer::converge(store, &CopyTarget::new(key.clone(), None), &unbound).await?;
    record_outcome(outcome);

    let desired = build_status(
        import.status.as_ref(),
        import.metadata.generation,
        ReadyReason::InvalidSpec,
        reason.to_string(),
    );
    update_status_if_changed(
        store,
        StatusTarget::Import,
        key,
        import.status.as_ref(),
        &desired,
    )
    .await?;

    Err(ReconcilerError::InvalidObject {
        kind: "SecretImport",
        key: key.to_string(),
        reason: reason.to_string(),
    })
}

fn record_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Created | SyncOutcome::Updated => {
            metrics::increment_copies_written(outcome.as_str());
        }
        SyncOutcome::Deleted => metrics::increment_copies_deleted(),
        _ => {}
    }
}
