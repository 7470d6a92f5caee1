//! # Cluster Store
//!
//! Read/write interface between the reconciliation engine and the cluster.
//!
//! - `api`: backed by the Kubernetes API (`kube::Api`)
//! - `memory`: in-process implementation used by tests and local dry runs
//!
//! The engine never talks to `kube::Api` directly; every read and write goes through
//! [`ClusterStore`], which keeps the reconcile logic testable without a cluster.

mod api;
mod memory;

pub use api::KubeStore;
pub use memory::{MemoryStore, WriteCounts};

use crate::crd::{SecretExport, SecretImport, ShareStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object; `None` when name or namespace is missing
    pub fn of<K: kube::Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        match (meta.namespace.as_deref(), meta.name.as_deref()) {
            (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => {
                Some(Self::new(ns, name))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Labels and annotations of a namespace, the only attributes selectors can address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMetadata {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl NamespaceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }
}

impl From<&Namespace> for NamespaceMetadata {
    fn from(ns: &Namespace) -> Self {
        Self {
            name: ns.metadata.name.clone().unwrap_or_default(),
            labels: ns.metadata.labels.clone().unwrap_or_default(),
            annotations: ns.metadata.annotations.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict on {kind} {key}")]
    Conflict { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} rejected: {reason}")]
    Invalid {
        kind: &'static str,
        key: ObjectKey,
        reason: String,
    },
    #[error("API unavailable: {0}")]
    Unavailable(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same request later can succeed
    ///
    /// Rejections of the request itself (400, 422) and encoding failures are permanent;
    /// conflicts, throttling, timeouts and transport failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict { .. }
            | StoreError::NotFound { .. }
            | StoreError::Unavailable(_) => true,
            StoreError::Kube(kube::Error::Api(api_err)) => {
                !matches!(api_err.code, 400 | 422)
            }
            StoreError::Kube(_) => true,
            StoreError::Invalid { .. } | StoreError::Encode(_) => false,
        }
    }
}

/// Generic read/write access to the objects the engine reconciles
///
/// Implementations must be safe to share between workers. Reads return `Ok(None)` for
/// absent objects; only transport and API failures are errors.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceMetadata>, StoreError>;

    async fn get_export(&self, key: &ObjectKey) -> Result<Option<SecretExport>, StoreError>;
    async fn list_exports(&self) -> Result<Vec<SecretExport>, StoreError>;
    async fn get_import(&self, key: &ObjectKey) -> Result<Option<SecretImport>, StoreError>;
    async fn list_imports(&self) -> Result<Vec<SecretImport>, StoreError>;

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, StoreError>;
    /// Create a Secret; fails with `Conflict` if one already exists
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;
    /// Replace a Secret wholesale; `metadata.resourceVersion` must match the stored one
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;
    /// Delete a Secret; returns whether it existed
    async fn delete_secret(&self, key: &ObjectKey) -> Result<bool, StoreError>;

    async fn patch_export_status(
        &self,
        key: &ObjectKey,
        status: &ShareStatus,
    ) -> Result<(), StoreError>;
    async fn patch_import_status(
        &self,
        key: &ObjectKey,
        status: &ShareStatus,
    ) -> Result<(), StoreError>;
}
