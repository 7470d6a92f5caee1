//! Common test utilities for the reconciliation tests
//!
//! Wires a [`Reconciler`] to an in-memory store and namespace index, and drives keys
//! to a fixed point the way the work queue would.

#![allow(dead_code, reason = "each test binary uses a different subset of helpers")]

use secret_share_controller::config::ControllerConfig;
use secret_share_controller::controller::namespaces::NamespaceIndex;
use secret_share_controller::controller::reconciler::{
    reconcile, ReconcileAction, ReconcileKey, Reconciler, ReconcilerError,
};
use secret_share_controller::crd::{SecretExportSpec, SelectorClause};
use secret_share_controller::store::{ClusterStore, MemoryStore, NamespaceMetadata, ObjectKey};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Upper bound on passes in one `settle`; a correct pass never comes close
const MAX_PASSES: usize = 256;

pub struct Harness {
    pub store: MemoryStore,
    pub ctx: Reconciler,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ControllerConfig::default()).await
    }

    pub async fn with_config(config: ControllerConfig) -> Self {
        let store = MemoryStore::new();
        let ctx = Reconciler::new(
            Arc::new(store.clone()),
            NamespaceIndex::new(),
            Arc::new(RwLock::new(config)),
        );
        ctx.namespaces.replace_all(Vec::new()).await;
        Self { store, ctx }
    }

    /// Create or relabel a namespace in both the store and the index
    pub async fn put_namespace(&self, namespace: NamespaceMetadata) {
        self.store.put_namespace(namespace.clone()).await;
        self.ctx.namespaces.apply(namespace).await;
    }

    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<ReconcileAction, ReconcilerError> {
        reconcile(&self.ctx, key).await
    }

    /// Every export and import currently in the store
    pub async fn all_keys(&self) -> Vec<ReconcileKey> {
        let exports = self.store.list_exports().await.unwrap();
        let imports = self.store.list_imports().await.unwrap();
        exports
            .iter()
            .filter_map(ObjectKey::of)
            .map(ReconcileKey::Export)
            .chain(imports.iter().filter_map(ObjectKey::of).map(ReconcileKey::Import))
            .collect()
    }

    /// Reconcile `keys` and their follow-ups until nothing is left
    ///
    /// Returns the errors paired with the key that produced them.
    pub async fn settle_keys(
        &self,
        keys: Vec<ReconcileKey>,
    ) -> Vec<(ReconcileKey, ReconcilerError)> {
        let mut pending: VecDeque<ReconcileKey> = keys.into();
        let mut errors = Vec::new();
        let mut passes = 0;
        while let Some(key) = pending.pop_front() {
            passes += 1;
            assert!(passes <= MAX_PASSES, "reconciliation did not settle");
            match self.reconcile(&key).await {
                Ok(action) => {
                    for follow_up in action.follow_ups {
                        if !pending.contains(&follow_up) {
                            pending.push_back(follow_up);
                        }
                    }
                }
                Err(e) => errors.push((key, e)),
            }
        }
        errors
    }

    /// Full resync followed by all follow-ups
    pub async fn settle(&self) -> Vec<(ReconcileKey, ReconcilerError)> {
        let keys = self.all_keys().await;
        self.settle_keys(keys).await
    }

    /// `settle` for scenarios where every key must succeed
    pub async fn settle_ok(&self) {
        let errors = self.settle().await;
        assert!(errors.is_empty(), "unexpected reconcile errors: {errors:?}");
    }
}

pub fn export_key(namespace: &str, name: &str) -> ReconcileKey {
    ReconcileKey::Export(ObjectKey::new(namespace, name))
}

pub fn import_key(namespace: &str, name: &str) -> ReconcileKey {
    ReconcileKey::Import(ObjectKey::new(namespace, name))
}

pub fn clause(key: &str, operator: &str, values: &[&str]) -> SelectorClause {
    SelectorClause {
        key: key.to_string(),
        operator: operator.to_string(),
        values: values.iter().map(|v| (*v).to_string()).collect(),
    }
}

pub fn export_spec(to_namespaces: &[&str], selector_clauses: Vec<SelectorClause>) -> SecretExportSpec {
    SecretExportSpec {
        to_namespaces: to_namespaces.iter().map(|ns| (*ns).to_string()).collect(),
        selector_clauses,
        ..Default::default()
    }
}

pub fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
