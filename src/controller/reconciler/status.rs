//! # Status Updates
//!
//! Builds the `Ready` condition for exports and imports and writes it only when it changed.

use crate::crd::{Condition, ShareStatus};
use crate::store::{ClusterStore, ObjectKey, StoreError};
use tracing::debug;

pub const CONDITION_READY: &str = "Ready";

/// Reason recorded on the `Ready` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyReason {
    Synced,
    NoSuchExport,
    NotAuthorized,
    SelectorError,
    SourceMissing,
    ForeignSecret,
    InvalidSpec,
}

impl ReadyReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyReason::Synced => "Synced",
            ReadyReason::NoSuchExport => "NoSuchExport",
            ReadyReason::NotAuthorized => "NotAuthorized",
            ReadyReason::SelectorError => "SelectorError",
            ReadyReason::SourceMissing => "SourceMissing",
            ReadyReason::ForeignSecret => "ForeignSecret",
            ReadyReason::InvalidSpec => "InvalidSpec",
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadyReason::Synced)
    }
}

/// Status carrying a single `Ready` condition
///
/// `lastTransitionTime` is carried over from `previous` while the condition status
/// stays the same.
#[must_use]
pub fn build_status(
    previous: Option<&ShareStatus>,
    generation: Option<i64>,
    reason: ReadyReason,
    message: String,
) -> ShareStatus {
    let status = if reason.is_ready() { "True" } else { "False" };
    let last_transition_time = previous
        .and_then(ShareStatus::ready_condition)
        .filter(|c| c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(chrono::Utc::now().to_rfc3339()));

    ShareStatus {
        observed_generation: generation,
        conditions: vec![Condition {
            r#type: CONDITION_READY.to_string(),
            status: status.to_string(),
            last_transition_time,
            reason: Some(reason.as_str().to_string()),
            message: Some(message.clone()),
        }],
        friendly_description: Some(message),
    }
}

/// Which status subresource to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    Export,
    Import,
}

/// Write `desired` unless it equals `current`
///
/// Returns whether a write happened. An object deleted in the meantime is not an error.
pub async fn update_status_if_changed(
    store: &dyn ClusterStore,
    target: StatusTarget,
    key: &ObjectKey,
    current: Option<&ShareStatus>,
    desired: &ShareStatus,
) -> Result<bool, StoreError> {
    if current == Some(desired) {
        debug!(resource = %key, "Skipping status update - status unchanged");
        return Ok(false);
    }

    let result = match target {
        StatusTarget::Export => store.patch_export_status(key, desired).await,
        StatusTarget::Import => store.patch_import_status(key, desired).await,
    };
    match result {
        Ok(()) => Ok(true),
        Err(StoreError::NotFound { .. }) => {
            debug!(resource = %key, "Object disappeared before its status was written");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_time_preserved_while_status_unchanged() {
        let first = build_status(None, Some(1), ReadyReason::NoSuchExport, "a".to_string());
        let mut aged = first.clone();
        aged.conditions[0].last_transition_time = Some("2020-01-01T00:00:00+00:00".to_string());

        // Different reason, same status: time kept
        let second = build_status(Some(&aged), Some(1), ReadyReason::NotAuthorized, "b".to_string());
        assert_eq!(
            second.conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00+00:00")
        );

        // Status flips: time moves
        let third = build_status(Some(&aged), Some(1), ReadyReason::Synced, "c".to_string());
        assert_ne!(
            third.conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00+00:00")
        );
        assert_eq!(third.ready_reason(), Some("Synced"));
        assert_eq!(third.conditions[0].status, "True");
    }

    #[test]
    fn test_rebuild_from_own_output_is_stable() {
        let first = build_status(None, Some(3), ReadyReason::SourceMissing, "m".to_string());
        let again = build_status(Some(&first), Some(3), ReadyReason::SourceMissing, "m".to_string());
        assert_eq!(first, again);
    }
}
