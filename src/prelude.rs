//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use secret_share_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (SecretExport, SecretImport, etc.)
//! - The cluster store trait and its implementations
//! - Reconciler types (Reconciler, ReconcilerError, etc.)
//! - Config types (ControllerConfig, ServerConfig)

// CRD types - most commonly used
pub use crate::crd::*;

// Cluster access - implement ClusterStore to run the reconciler against another backend
pub use crate::store::{ClusterStore, KubeStore, MemoryStore, NamespaceMetadata, ObjectKey, StoreError};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, ReconcileAction, ReconcileKey, Reconciler, ReconcilerError,
};

// Namespace index consulted for authorization
pub use crate::controller::namespaces::NamespaceIndex;

// Config types - for configuration management
pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};
