//! # Reconciler
//!
//! Core reconciliation logic for `SecretExport` and `SecretImport` resources.
//!
//! Every pass recomputes its result from scratch:
//!
//! - **Export key**: compute the authorized namespace set, write the export's status,
//!   and return the keys of the imports that reference the export. A deleted export
//!   still returns them so their copies are withdrawn.
//! - **Import key**: resolve the import against its export, converge the Secret copy,
//!   and write the import's status.
//!
//! Retries, timeouts and per-key serialization are handled by the runtime's work queue.

pub mod export;
pub mod import;
pub mod status;
pub mod types;

pub use export::{reconcile_export, referencing_imports};
pub use import::reconcile_import;
pub use types::{ReconcileAction, ReconcileKey, Reconciler, ReconcilerError};

use tracing::Instrument;

/// Run one reconcile pass for a key
pub async fn reconcile(
    ctx: &Reconciler,
    key: &ReconcileKey,
) -> Result<ReconcileAction, ReconcilerError> {
    let object = key.object();
    let span = tracing::info_span!(
        "controller.reconcile",
        resource.kind = key.kind(),
        resource.namespace = %object.namespace,
        resource.name = %object.name,
    );

    async {
        match key {
            ReconcileKey::Export(object) => reconcile_export(ctx, object).await,
            ReconcileKey::Import(object) => reconcile_import(ctx, object).await,
        }
    }
    .instrument(span)
    .await
}
