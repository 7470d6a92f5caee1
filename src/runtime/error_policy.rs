//! # Error Policy
//!
//! Error handling for the worker pool and the watch streams.
//!
//! Reconcile errors are classified into retryable and permanent ones; the work queue
//! owns the per-key backoff. Watch stream errors are classified to pick a restart delay.

use crate::controller::reconciler::{ReconcileKey, ReconcilerError};
use crate::observability::metrics;
use crate::runtime::queue::{Disposition, KeyOutcome};
use std::time::Duration;
use tracing::{error, info, warn};

/// Decide how the queue treats a failed pass
#[must_use]
pub fn classify_reconcile_error(error: &ReconcilerError) -> KeyOutcome {
    if error.is_transient() {
        KeyOutcome::Failed
    } else {
        KeyOutcome::Abandoned
    }
}

/// Log and count a failed pass and report what the queue decided
pub fn handle_reconciliation_error(
    key: &ReconcileKey,
    error: &ReconcilerError,
    disposition: Disposition,
) {
    let object = key.object();
    metrics::increment_reconcile_errors(key.kind(), error.as_str());

    match disposition {
        Disposition::Retrying { attempt, delay } => {
            warn!(
                resource.kind = key.kind(),
                resource.namespace = %object.namespace,
                resource.name = %object.name,
                error = %error,
                attempt,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconciliation failed, retrying with backoff"
            );
            metrics::increment_requeues("error-backoff");
        }
        Disposition::Dropped { attempts } => {
            error!(
                resource.kind = key.kind(),
                resource.namespace = %object.namespace,
                resource.name = %object.name,
                error = %error,
                attempts,
                "Giving up on key until the next event or resync"
            );
            metrics::increment_keys_dropped(key.kind());
        }
        Disposition::Converged | Disposition::Requeued(_) => {
            info!(
                resource.kind = key.kind(),
                resource.namespace = %object.namespace,
                resource.name = %object.name,
                error = %error,
                "Reconciliation error recorded"
            );
        }
    }
}

/// Class of a watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401/403: credentials or RBAC revoked
    Unauthorized,
    /// 410: resource version expired, a relist fixes it
    Expired,
    /// 429 or storage re-initialising
    Throttled,
    /// 404: CRD missing or removed
    NotFound,
    Other,
}

/// Classify a watch error from its rendered form
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    // 404 first: a plain-text 404 body surfaces as a decode error that mentions other codes
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found")
        || error_string.contains("NotFound");
    if is_not_found {
        WatchErrorKind::NotFound
    } else if error_string.contains("401")
        || error_string.contains("403")
        || error_string.contains("Unauthorized")
        || error_string.contains("Forbidden")
    {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch stream failure and return how long to wait before restarting it
#[must_use]
pub fn handle_watch_stream_error(
    resource: &str,
    error_string: &str,
    restart_delay: Duration,
    max_backoff: Duration,
) -> Duration {
    metrics::increment_watch_restarts(resource);
    match classify_watch_error(error_string) {
        WatchErrorKind::Expired => {
            warn!(
                resource,
                "Watch resource version expired (410) - this is normal during API server restarts, relisting"
            );
            Duration::ZERO
        }
        WatchErrorKind::Throttled => {
            warn!(
                resource,
                "API server throttling or storage reinitializing (429), backing off before restart"
            );
            restart_delay.saturating_mul(2).min(max_backoff.max(restart_delay))
        }
        WatchErrorKind::Unauthorized => {
            error!(
                resource,
                error = %error_string,
                "Watch authentication failed - RBAC may have been revoked or the token expired"
            );
            error!("Verify the controller's ClusterRole grants list/watch on {}", resource);
            restart_delay
        }
        WatchErrorKind::NotFound => {
            warn!(
                resource,
                error = %error_string,
                "Watched resource not found (404) - is the CRD installed?"
            );
            restart_delay
        }
        WatchErrorKind::Other => {
            error!(resource, error = %error_string, "Watch stream error");
            restart_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ObjectKey, StoreError};

    #[test]
    fn test_classify_reconcile_error() {
        let conflict = ReconcilerError::Store(StoreError::Conflict {
            kind: "Secret",
            key: ObjectKey::new("a", "b"),
        });
        assert_eq!(classify_reconcile_error(&conflict), KeyOutcome::Failed);

        let invalid = ReconcilerError::InvalidObject {
            kind: "SecretImport",
            key: "a/b".to_string(),
            reason: "empty".to_string(),
        };
        assert_eq!(classify_reconcile_error(&invalid), KeyOutcome::Abandoned);
    }

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("ErrorResponse { code: 410, reason: \"Expired\" }"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("ErrorResponse { code: 401, reason: \"Unauthorized\" }"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("invalid type: integer `404`, expected WatchEvent"),
            WatchErrorKind::NotFound
        );
        assert_eq!(classify_watch_error("429 TooManyRequests"), WatchErrorKind::Throttled);
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[test]
    fn test_expired_restarts_immediately() {
        let delay = handle_watch_stream_error(
            "Namespace",
            "too old resource version",
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        assert_eq!(delay, Duration::ZERO);
    }
}
