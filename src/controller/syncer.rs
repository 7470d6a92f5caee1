//! # Secret Syncer
//!
//! Converges the Secret copy of one import towards its binding.
//!
//! - Bound with a source: the copy mirrors the source's type and data exactly and carries
//!   the managed-by label, the imported-from and source-revision annotations, and an
//!   owner reference to the import. Nothing is written when the copy already matches.
//! - Bound without a source: the copy is left alone and the key is retried later.
//! - Unbound: the copy is deleted.
//!
//! Secrets without the managed-by label belong to someone else and are never overwritten
//! or deleted.

use crate::constants::{
    ANNOTATION_IMPORTED_FROM, ANNOTATION_SOURCE_REVISION, CONTROLLER_NAME, DEFAULT_SECRET_TYPE,
    LABEL_MANAGED_BY,
};
use crate::controller::binder::Binding;
use crate::store::{ClusterStore, ObjectKey, StoreError};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// Unbound and no managed copy exists
    Absent,
    /// Bound but the source Secret does not exist
    SourceMissing,
    /// A Secret not managed by this controller occupies the copy's name
    ForeignSecret,
}

impl SyncOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Deleted => "deleted",
            SyncOutcome::Absent => "absent",
            SyncOutcome::SourceMissing => "source-missing",
            SyncOutcome::ForeignSecret => "foreign-secret",
        }
    }

    /// Whether the outcome changed a Secret
    #[must_use]
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Created | SyncOutcome::Updated | SyncOutcome::Deleted
        )
    }
}

/// Where a copy lives and who owns it
#[derive(Debug, Clone)]
pub struct CopyTarget {
    pub key: ObjectKey,
    pub owner: Option<OwnerReference>,
}

impl CopyTarget {
    #[must_use]
    pub fn new(key: ObjectKey, owner: Option<OwnerReference>) -> Self {
        Self { key, owner }
    }
}

/// Whether a Secret carries this controller's managed-by label
#[must_use]
pub fn is_managed(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_BY))
        .is_some_and(|value| value == CONTROLLER_NAME)
}

/// The copy a target should hold for a given source
#[must_use]
pub fn desired_copy(target: &CopyTarget, source_key: &ObjectKey, source: &Secret) -> Secret {
    let labels = BTreeMap::from([(LABEL_MANAGED_BY.to_string(), CONTROLLER_NAME.to_string())]);
    let mut annotations = BTreeMap::from([(
        ANNOTATION_IMPORTED_FROM.to_string(),
        source_key.to_string(),
    )]);
    if let Some(revision) = &source.metadata.resource_version {
        annotations.insert(ANNOTATION_SOURCE_REVISION.to_string(), revision.clone());
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(target.key.name.clone()),
            namespace: Some(target.key.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: target.owner.clone().map(|owner| vec![owner]),
            ..Default::default()
        },
        type_: Some(secret_type(source).to_string()),
        data: Some(secret_data(source)),
        ..Default::default()
    }
}

fn secret_type(secret: &Secret) -> &str {
    secret
        .type_
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_SECRET_TYPE)
}

fn secret_data(secret: &Secret) -> BTreeMap<String, ByteString> {
    secret.data.clone().unwrap_or_default()
}

/// Whether `existing` already holds everything `desired` specifies
fn matches_desired(existing: &Secret, desired: &Secret) -> bool {
    secret_type(existing) == secret_type(desired)
        && secret_data(existing) == secret_data(desired)
        && existing.metadata.labels == desired.metadata.labels
        && existing.metadata.annotations == desired.metadata.annotations
        && existing.metadata.owner_references.clone().unwrap_or_default()
            == desired.metadata.owner_references.clone().unwrap_or_default()
}

/// Bring the copy at `target` in line with `binding`
pub async fn converge(
    store: &dyn ClusterStore,
    target: &CopyTarget,
    binding: &Binding,
) -> Result<SyncOutcome, StoreError> {
    let existing = store.get_secret(&target.key).await?;

    let pair = match binding {
        Binding::Bound(pair) => pair,
        Binding::Unbound(reason) => {
            return match existing {
                Some(secret) if is_managed(&secret) => {
                    let deleted = store.delete_secret(&target.key).await?;
                    if deleted {
                        info!(secret = %target.key, reason = %reason, "Deleted secret copy");
                        Ok(SyncOutcome::Deleted)
                    } else {
                        Ok(SyncOutcome::Absent)
                    }
                }
                Some(_) => {
                    debug!(secret = %target.key, "Unbound import shadows an unmanaged secret, leaving it");
                    Ok(SyncOutcome::Absent)
                }
                None => Ok(SyncOutcome::Absent),
            };
        }
    };

    let Some(source) = store.get_secret(&pair.source).await? else {
        debug!(secret = %target.key, source = %pair.source, "Source secret does not exist yet");
        return Ok(SyncOutcome::SourceMissing);
    };

    let mut desired = desired_copy(target, &pair.source, &source);

    match existing {
        None => {
            store.create_secret(&desired).await?;
            info!(secret = %target.key, source = %pair.source, "Created secret copy");
            Ok(SyncOutcome::Created)
        }
        Some(current) if !is_managed(&current) => {
            warn!(
                secret = %target.key,
                "Secret exists and is not managed by {CONTROLLER_NAME}, refusing to overwrite"
            );
            Ok(SyncOutcome::ForeignSecret)
        }
        Some(current) if matches_desired(&current, &desired) => Ok(SyncOutcome::Unchanged),
        Some(current) if secret_type(&current) != secret_type(&desired) => {
            // Secret.type is immutable, so the copy is recreated under the new type
            store.delete_secret(&target.key).await?;
            store.create_secret(&desired).await?;
            info!(
                secret = %target.key,
                source = %pair.source,
                from_type = secret_type(&current),
                to_type = secret_type(&desired),
                "Recreated secret copy with the source's new type"
            );
            Ok(SyncOutcome::Updated)
        }
        Some(current) => {
            // Optimistic concurrency: a concurrent writer turns this into a Conflict
            desired.metadata.resource_version = current.metadata.resource_version;
            store.replace_secret(&desired).await?;
            info!(secret = %target.key, source = %pair.source, "Updated secret copy");
            Ok(SyncOutcome::Updated)
        }
    }
}
