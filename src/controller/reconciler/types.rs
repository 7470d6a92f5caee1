//! # Types
//!
//! Core types for the reconciler.

use crate::config::SharedControllerConfig;
use crate::controller::namespaces::NamespaceIndex;
use crate::store::{ClusterStore, ObjectKey, StoreError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("reconcile attempt exceeded {0:?}")]
    Timeout(Duration),
    #[error("invalid {kind} {key}: {reason}")]
    InvalidObject {
        kind: &'static str,
        key: String,
        reason: String,
    },
}

impl ReconcilerError {
    /// Whether the key should be retried with backoff
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcilerError::Store(err) => err.is_transient(),
            ReconcilerError::Timeout(_) => true,
            ReconcilerError::InvalidObject { .. } => false,
        }
    }

    /// Short label used for the error metric
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerError::Store(StoreError::Conflict { .. }) => "conflict",
            ReconcilerError::Store(_) => "store",
            ReconcilerError::Timeout(_) => "timeout",
            ReconcilerError::InvalidObject { .. } => "invalid-object",
        }
    }
}

/// Unit of work in the queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReconcileKey {
    Export(ObjectKey),
    Import(ObjectKey),
}

impl ReconcileKey {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileKey::Export(_) => "SecretExport",
            ReconcileKey::Import(_) => "SecretImport",
        }
    }

    #[must_use]
    pub fn object(&self) -> &ObjectKey {
        match self {
            ReconcileKey::Export(key) | ReconcileKey::Import(key) => key,
        }
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.object())
    }
}

/// What the worker does with a key after a successful pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileAction {
    /// Revisit the key after this delay even without new events
    pub requeue_after: Option<Duration>,
    /// Keys whose state depends on the result of this pass
    pub follow_ups: Vec<ReconcileKey>,
}

impl ReconcileAction {
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            follow_ups: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_follow_ups(mut self, keys: Vec<ReconcileKey>) -> Self {
        self.follow_ups = keys;
        self
    }
}

/// Shared context handed to every reconcile pass
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ClusterStore>,
    pub namespaces: NamespaceIndex,
    pub config: SharedControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespaces", &self.namespaces)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        namespaces: NamespaceIndex,
        config: SharedControllerConfig,
    ) -> Self {
        Self {
            store,
            namespaces,
            config,
        }
    }
}
