//! # Import Binder
//!
//! Pairs a SecretImport with the SecretExport of the same name in its `fromNamespace`
//! and decides whether the import's namespace is authorized.
//!
//! Resolution reads everything fresh from the store and the namespace index; no binding
//! survives between reconcile passes.

use crate::controller::matcher::ExportPolicy;
use crate::controller::namespaces::NamespaceIndex;
use crate::controller::selector::SelectorError;
use crate::crd::{SecretExport, SecretImport};
use crate::store::{ClusterStore, ObjectKey, StoreError};
use std::fmt;

/// An import bound to an export that authorizes it
#[derive(Debug, Clone)]
pub struct BoundPair {
    /// Where the copy lives: the import's namespace and name
    pub target: ObjectKey,
    /// Source Secret, identical to the export's key
    pub source: ObjectKey,
    pub export: SecretExport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnboundReason {
    NoSuchExport { export: ObjectKey },
    NotAuthorized {
        export: ObjectKey,
        selector_error: Option<SelectorError>,
    },
    ImportDeleted,
    /// The import itself is malformed
    InvalidImport(String),
}

impl fmt::Display for UnboundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnboundReason::NoSuchExport { export } => {
                write!(f, "SecretExport {export} does not exist")
            }
            UnboundReason::NotAuthorized {
                export,
                selector_error: Some(err),
            } => write!(
                f,
                "SecretExport {export} does not authorize this namespace (selector ignored: {err})"
            ),
            UnboundReason::NotAuthorized { export, .. } => {
                write!(f, "SecretExport {export} does not authorize this namespace")
            }
            UnboundReason::ImportDeleted => f.write_str("SecretImport was deleted"),
            UnboundReason::InvalidImport(reason) => write!(f, "SecretImport is invalid: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Binding {
    Bound(BoundPair),
    Unbound(UnboundReason),
}

impl Binding {
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }
}

/// Resolve the binding of an existing import
///
/// The caller guarantees that the import has a namespace, a name, and a non-empty
/// `fromNamespace`.
pub async fn resolve(
    import_key: &ObjectKey,
    import: &SecretImport,
    store: &dyn ClusterStore,
    namespaces: &NamespaceIndex,
) -> Result<Binding, StoreError> {
    let export_key = ObjectKey::new(import.spec.from_namespace.trim(), &import_key.name);
    let Some(export) = store.get_export(&export_key).await? else {
        return Ok(Binding::Unbound(UnboundReason::NoSuchExport { export: export_key }));
    };

    let policy = ExportPolicy::compile(&export.spec);
    let authorized = if policy.lists(&import_key.namespace) {
        true
    } else {
        match namespaces.lookup(&import_key.namespace, store).await? {
            Some(consumer) => policy.admits(&consumer),
            // A namespace that no longer exists cannot be authorized
            None => false,
        }
    };

    if !authorized {
        return Ok(Binding::Unbound(UnboundReason::NotAuthorized {
            export: export_key,
            selector_error: policy.selector_error().cloned(),
        }));
    }

    Ok(Binding::Bound(BoundPair {
        target: import_key.clone(),
        source: export_key,
        export,
    }))
}
