//! # Namespace Metadata Index
//!
//! Watch-fed cache of namespace name to labels and annotations.
//!
//! The watch loop is the only writer. It applies every namespace event to the index
//! before enqueuing the keys that event affects, so a worker that dequeues such a key
//! always sees metadata at least as new as the event that triggered it.

use crate::store::{ClusterStore, NamespaceMetadata, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Consistent copy of the index taken at one instant
pub type NamespaceSnapshot = BTreeMap<String, NamespaceMetadata>;

#[derive(Clone, Debug)]
pub struct NamespaceIndex {
    entries: Arc<RwLock<NamespaceSnapshot>>,
    synced: Arc<watch::Sender<bool>>,
}

impl Default for NamespaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceIndex {
    #[must_use]
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            synced: Arc::new(synced),
        }
    }

    pub async fn get(&self, name: &str) -> Option<NamespaceMetadata> {
        self.entries.read().await.get(name).cloned()
    }

    /// Cached metadata, falling back to the store on a miss
    ///
    /// The fallback result is not written back; only the watch path populates the index.
    pub async fn lookup(
        &self,
        name: &str,
        store: &dyn ClusterStore,
    ) -> Result<Option<NamespaceMetadata>, StoreError> {
        if let Some(cached) = self.get(name).await {
            return Ok(Some(cached));
        }
        store.get_namespace(name).await
    }

    /// Insert or update one namespace
    pub async fn apply(&self, metadata: NamespaceMetadata) {
        self.entries
            .write()
            .await
            .insert(metadata.name.clone(), metadata);
    }

    /// Remove one namespace; returns whether it was known
    pub async fn remove(&self, name: &str) -> bool {
        self.entries.write().await.remove(name).is_some()
    }

    /// Swap in a complete listing and mark the index as synced
    pub async fn replace_all(&self, namespaces: impl IntoIterator<Item = NamespaceMetadata>) {
        let fresh: NamespaceSnapshot = namespaces
            .into_iter()
            .map(|ns| (ns.name.clone(), ns))
            .collect();
        *self.entries.write().await = fresh;
        self.synced.send_replace(true);
    }

    pub async fn snapshot(&self) -> NamespaceSnapshot {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether a full listing has been applied at least once
    #[must_use]
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolve once the first full listing has been applied
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as self, so wait_for cannot observe a closed channel
        let _ = rx.wait_for(|synced| *synced).await;
    }
}
