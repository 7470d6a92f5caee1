//! # Export Reconciliation
//!
//! Recomputes the authorized set of one SecretExport, records it on the export's status,
//! and hands back the imports that reference the export so their copies converge too.

use crate::controller::matcher::ExportPolicy;
use crate::controller::reconciler::status::{
    build_status, update_status_if_changed, ReadyReason, StatusTarget,
};
use crate::controller::reconciler::types::{
    ReconcileAction, ReconcileKey, Reconciler, ReconcilerError,
};
use crate::observability::metrics;
use crate::store::{ClusterStore, ObjectKey, StoreError};
use tracing::{debug, info, warn};

/// Import keys paired with the export `(namespace, name)`
pub async fn referencing_imports(
    store: &dyn ClusterStore,
    export_key: &ObjectKey,
) -> Result<Vec<ReconcileKey>, StoreError> {
    let imports = store.list_imports().await?;
    Ok(imports
        .iter()
        .filter(|import| {
            import.spec.from_namespace.trim() == export_key.namespace
                && import.metadata.name.as_deref() == Some(export_key.name.as_str())
        })
        .filter_map(ObjectKey::of)
        .map(ReconcileKey::Import)
        .collect())
}

pub async fn reconcile_export(
    ctx: &Reconciler,
    key: &ObjectKey,
) -> Result<ReconcileAction, ReconcilerError> {
    let store = ctx.store.as_ref();
    let follow_ups = referencing_imports(store, key).await?;

    let Some(export) = store.get_export(key).await? else {
        debug!(
            resource.namespace = %key.namespace,
            resource.name = %key.name,
            imports = follow_ups.len(),
            "SecretExport gone, revisiting its imports"
        );
        metrics::remove_authorized_namespaces(&key.namespace, &key.name);
        return Ok(ReconcileAction::done().with_follow_ups(follow_ups));
    };

    let policy = ExportPolicy::compile(&export.spec);
    let snapshot = ctx.namespaces.snapshot().await;
    let authorization = policy.authorized_set(&snapshot);
    metrics::set_authorized_namespaces(
        &key.namespace,
        &key.name,
        authorization.namespaces.len(),
    );

    let (reason, message) = match &authorization.selector_error {
        Some(err) => {
            warn!(
                resource.namespace = %key.namespace,
                resource.name = %key.name,
                error = %err,
                "SecretExport selector is invalid, only the explicit namespace list applies"
            );
            (ReadyReason::SelectorError, format!("Invalid selector: {err}"))
        }
        None if authorization.is_empty() => (
            ReadyReason::Synced,
            "Not exported to any namespace".to_string(),
        ),
        None => (
            ReadyReason::Synced,
            format!(
                "Exported to {} namespace(s)",
                authorization.namespaces.len()
            ),
        ),
    };

    let desired = build_status(
        export.status.as_ref(),
        export.metadata.generation,
        reason,
        message,
    );
    let written = update_status_if_changed(
        store,
        StatusTarget::Export,
        key,
        export.status.as_ref(),
        &desired,
    )
    .await?;
    if written {
        info!(
            resource.namespace = %key.namespace,
            resource.name = %key.name,
            authorized = authorization.namespaces.len(),
            reason = reason.as_str(),
            "Updated SecretExport status"
        );
    }

    Ok(ReconcileAction::done().with_follow_ups(follow_ups))
}
