//! # Export Matcher
//!
//! Computes the set of namespaces a SecretExport authorizes.
//!
//! A namespace is authorized when it is named in the explicit list, when the list holds
//! the wildcard, or when it satisfies every selector clause. The set is derived from
//! scratch on each call and never stored.

use crate::constants::ALL_NAMESPACES;
use crate::controller::namespaces::NamespaceSnapshot;
use crate::controller::selector::{Selector, SelectorError};
use crate::crd::SecretExportSpec;
use crate::store::NamespaceMetadata;
use std::collections::BTreeSet;

/// Authorized namespaces of one export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    pub namespaces: BTreeSet<String>,
    /// Set when the selector failed to compile; the selector then contributes nothing
    pub selector_error: Option<SelectorError>,
}

impl Authorization {
    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// An export spec prepared for repeated membership checks
#[derive(Debug, Clone)]
pub struct ExportPolicy {
    explicit: BTreeSet<String>,
    wildcard: bool,
    selector: Result<Selector, SelectorError>,
}

impl ExportPolicy {
    #[must_use]
    pub fn compile(spec: &SecretExportSpec) -> Self {
        let mut explicit = BTreeSet::new();
        let mut wildcard = false;
        for target in spec.explicit_targets() {
            if target == ALL_NAMESPACES {
                wildcard = true;
            } else {
                explicit.insert(target.to_string());
            }
        }
        Self {
            explicit,
            wildcard,
            selector: Selector::compile(&spec.all_selector_clauses()),
        }
    }

    #[must_use]
    pub fn selector_error(&self) -> Option<&SelectorError> {
        self.selector.as_ref().err()
    }

    /// Whether the namespace is named explicitly (not through the wildcard)
    #[must_use]
    pub fn lists(&self, namespace: &str) -> bool {
        self.explicit.contains(namespace)
    }

    /// Membership test for a namespace whose metadata is known
    #[must_use]
    pub fn admits(&self, namespace: &NamespaceMetadata) -> bool {
        if self.wildcard || self.lists(&namespace.name) {
            return true;
        }
        match &self.selector {
            // An empty clause list selects nothing
            Ok(selector) => !selector.is_empty() && selector.matches(namespace),
            Err(_) => false,
        }
    }

    /// Evaluate against every namespace of the snapshot
    ///
    /// Explicit entries are included even when the snapshot does not know them yet.
    #[must_use]
    pub fn authorized_set(&self, namespaces: &NamespaceSnapshot) -> Authorization {
        let mut authorized = self.explicit.clone();
        authorized.extend(
            namespaces
                .values()
                .filter(|ns| self.admits(ns))
                .map(|ns| ns.name.clone()),
        );
        Authorization {
            namespaces: authorized,
            selector_error: self.selector_error().cloned(),
        }
    }
}

/// Authorized set of an export spec against a namespace snapshot
#[must_use]
pub fn authorized_set(spec: &SecretExportSpec, namespaces: &NamespaceSnapshot) -> Authorization {
    ExportPolicy::compile(spec).authorized_set(namespaces)
}
