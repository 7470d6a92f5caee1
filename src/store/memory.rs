//! # In-Memory Store
//!
//! [`ClusterStore`] kept entirely in process memory.
//!
//! Behaves like the API server for the subset of semantics the engine relies on:
//! resourceVersion checks on replace, 409 on duplicate create, generation bumps on
//! spec changes. Writes are counted so tests can assert idempotence, and transient
//! failures can be injected to exercise retry paths.
//!
//! This is ephemeral - data does not persist across restarts.
//! Thread-safe using Arc<RwLock> for concurrent access.

use super::{ClusterStore, NamespaceMetadata, ObjectKey, StoreError};
use crate::constants::DEFAULT_SECRET_TYPE;
use crate::crd::{SecretExport, SecretExportSpec, SecretImport, SecretImportSpec, ShareStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Number of mutating calls that reached the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub secret_creates: u64,
    pub secret_replaces: u64,
    pub secret_deletes: u64,
    pub status_patches: u64,
}

impl WriteCounts {
    /// Writes that touched Secret objects
    #[must_use]
    pub fn secret_writes(&self) -> u64 {
        self.secret_creates + self.secret_replaces + self.secret_deletes
    }
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, NamespaceMetadata>,
    exports: BTreeMap<ObjectKey, SecretExport>,
    imports: BTreeMap<ObjectKey, SecretImport>,
    secrets: BTreeMap<ObjectKey, Secret>,
    writes: WriteCounts,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    revision: Arc<AtomicU64>,
    failing_writes: Arc<AtomicU32>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Make the next `count` write calls fail with `StoreError::Unavailable`
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Result<(), StoreError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    pub async fn writes(&self) -> WriteCounts {
        self.state.read().await.writes
    }

    pub async fn put_namespace(&self, namespace: NamespaceMetadata) {
        let mut state = self.state.write().await;
        state.namespaces.insert(namespace.name.clone(), namespace);
    }

    pub async fn remove_namespace(&self, name: &str) {
        self.state.write().await.namespaces.remove(name);
    }

    /// Create or update an export; the generation moves only when the spec changes
    pub async fn put_export(&self, namespace: &str, name: &str, spec: SecretExportSpec) -> SecretExport {
        let key = ObjectKey::new(namespace, name);
        let revision = self.next_revision();
        let mut state = self.state.write().await;
        let export = match state.exports.get(&key) {
            Some(existing) if existing.spec == spec => existing.clone(),
            Some(existing) => {
                let mut updated = existing.clone();
                updated.spec = spec;
                updated.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
                updated.metadata.resource_version = Some(revision);
                updated
            }
            None => {
                let mut created = SecretExport::new(name, spec);
                created.metadata.namespace = Some(namespace.to_string());
                created.metadata.uid = Some(format!("export-uid-{revision}"));
                created.metadata.generation = Some(1);
                created.metadata.resource_version = Some(revision);
                created
            }
        };
        state.exports.insert(key, export.clone());
        export
    }

    pub async fn delete_export(&self, namespace: &str, name: &str) -> bool {
        let key = ObjectKey::new(namespace, name);
        self.state.write().await.exports.remove(&key).is_some()
    }

    /// Create or update an import; the generation moves only when the spec changes
    pub async fn put_import(&self, namespace: &str, name: &str, from_namespace: &str) -> SecretImport {
        let key = ObjectKey::new(namespace, name);
        let spec = SecretImportSpec {
            from_namespace: from_namespace.to_string(),
        };
        let revision = self.next_revision();
        let mut state = self.state.write().await;
        let import = match state.imports.get(&key) {
            Some(existing) if existing.spec == spec => existing.clone(),
            Some(existing) => {
                let mut updated = existing.clone();
                updated.spec = spec;
                updated.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
                updated.metadata.resource_version = Some(revision);
                updated
            }
            None => {
                let mut created = SecretImport::new(name, spec);
                created.metadata.namespace = Some(namespace.to_string());
                created.metadata.uid = Some(format!("import-uid-{revision}"));
                created.metadata.generation = Some(1);
                created.metadata.resource_version = Some(revision);
                created
            }
        };
        state.imports.insert(key, import.clone());
        import
    }

    pub async fn delete_import(&self, namespace: &str, name: &str) -> bool {
        let key = ObjectKey::new(namespace, name);
        self.state.write().await.imports.remove(&key).is_some()
    }

    /// Write a source Secret as an external producer would (not counted as engine writes)
    pub async fn put_source_secret(
        &self,
        namespace: &str,
        name: &str,
        secret_type: &str,
        data: &[(&str, &str)],
    ) {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.resource_version = Some(self.next_revision());
        secret.type_ = Some(secret_type.to_string());
        secret.data = Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        );
        let key = ObjectKey::new(namespace, name);
        self.state.write().await.secrets.insert(key, secret);
    }

    /// Remove a Secret as an external actor would (not counted as engine writes)
    pub async fn remove_source_secret(&self, namespace: &str, name: &str) -> bool {
        let key = ObjectKey::new(namespace, name);
        self.state.write().await.secrets.remove(&key).is_some()
    }

    /// Secret data decoded as UTF-8, for assertions
    pub async fn secret_string_data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        let key = ObjectKey::new(namespace, name);
        let state = self.state.read().await;
        state.secrets.get(&key).map(|secret| {
            secret
                .data
                .iter()
                .flatten()
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
                .collect()
        })
    }

    /// Namespaces that currently hold a Secret with the given name
    pub async fn namespaces_with_secret(&self, name: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .secrets
            .keys()
            .filter(|key| key.name == name)
            .map(|key| key.namespace.clone())
            .collect()
    }

    pub async fn export_status(&self, namespace: &str, name: &str) -> Option<ShareStatus> {
        let key = ObjectKey::new(namespace, name);
        let state = self.state.read().await;
        state.exports.get(&key).and_then(|e| e.status.clone())
    }

    pub async fn import_status(&self, namespace: &str, name: &str) -> Option<ShareStatus> {
        let key = ObjectKey::new(namespace, name);
        let state = self.state.read().await;
        state.imports.get(&key).and_then(|i| i.status.clone())
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceMetadata>, StoreError> {
        Ok(self.state.read().await.namespaces.get(name).cloned())
    }

    async fn get_export(&self, key: &ObjectKey) -> Result<Option<SecretExport>, StoreError> {
        Ok(self.state.read().await.exports.get(key).cloned())
    }

    async fn list_exports(&self) -> Result<Vec<SecretExport>, StoreError> {
        Ok(self.state.read().await.exports.values().cloned().collect())
    }

    async fn get_import(&self, key: &ObjectKey) -> Result<Option<SecretImport>, StoreError> {
        Ok(self.state.read().await.imports.get(key).cloned())
    }

    async fn list_imports(&self) -> Result<Vec<SecretImport>, StoreError> {
        Ok(self.state.read().await.imports.values().cloned().collect())
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, StoreError> {
        Ok(self.state.read().await.secrets.get(key).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.take_injected_failure()?;
        let key = ObjectKey::of(secret)
            .ok_or_else(|| StoreError::Unavailable("Secret without name".to_string()))?;
        let revision = self.next_revision();
        let mut state = self.state.write().await;
        if state.secrets.contains_key(&key) {
            return Err(StoreError::Conflict {
                kind: "Secret",
                key,
            });
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(revision);
        state.secrets.insert(key, stored.clone());
        state.writes.secret_creates += 1;
        Ok(stored)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.take_injected_failure()?;
        let key = ObjectKey::of(secret)
            .ok_or_else(|| StoreError::Unavailable("Secret without name".to_string()))?;
        let revision = self.next_revision();
        let mut state = self.state.write().await;
        let Some(current) = state.secrets.get(&key) else {
            return Err(StoreError::NotFound {
                kind: "Secret",
                key,
            });
        };
        if secret.metadata.resource_version.is_some()
            && secret.metadata.resource_version != current.metadata.resource_version
        {
            return Err(StoreError::Conflict {
                kind: "Secret",
                key,
            });
        }
        // Secret.type is immutable on the API server
        let type_of = |s: &Secret| s.type_.clone().unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string());
        if type_of(secret) != type_of(current) {
            return Err(StoreError::Invalid {
                kind: "Secret",
                key,
                reason: "field is immutable: type".to_string(),
            });
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(revision);
        state.secrets.insert(key, stored.clone());
        state.writes.secret_replaces += 1;
        Ok(stored)
    }

    async fn delete_secret(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        self.take_injected_failure()?;
        let mut state = self.state.write().await;
        let existed = state.secrets.remove(key).is_some();
        if existed {
            state.writes.secret_deletes += 1;
        }
        Ok(existed)
    }

    async fn patch_export_status(
        &self,
        key: &ObjectKey,
        status: &ShareStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let Some(export) = state.exports.get_mut(key) else {
            return Err(StoreError::NotFound {
                kind: "SecretExport",
                key: key.clone(),
            });
        };
        export.status = Some(status.clone());
        state.writes.status_patches += 1;
        Ok(())
    }

    async fn patch_import_status(
        &self,
        key: &ObjectKey,
        status: &ShareStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let Some(import) = state.imports.get_mut(key) else {
            return Err(StoreError::NotFound {
                kind: "SecretImport",
                key: key.clone(),
            });
        };
        import.status = Some(status.clone());
        state.writes.status_patches += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_with_stale_revision_conflicts() {
        let store = MemoryStore::new();
        store
            .put_source_secret("ns", "s", "Opaque", &[("a", "1")])
            .await;
        let key = ObjectKey::new("ns", "s");
        let mut stale = store.get_secret(&key).await.unwrap().unwrap();
        let fresh = store.replace_secret(&stale).await.unwrap();
        assert_ne!(fresh.metadata.resource_version, stale.metadata.resource_version);

        stale.type_ = Some("other".to_string());
        let err = store.replace_secret(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_replace_cannot_change_type() {
        let store = MemoryStore::new();
        store.put_source_secret("ns", "s", "Opaque", &[("a", "1")]).await;
        let mut secret = store.get_secret(&ObjectKey::new("ns", "s")).await.unwrap().unwrap();
        secret.type_ = Some("kubernetes.io/basic-auth".to_string());

        let err = store.replace_secret(&secret).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_create_existing_conflicts() {
        let store = MemoryStore::new();
        store.put_source_secret("ns", "s", "Opaque", &[]).await;
        let existing = store
            .get_secret(&ObjectKey::new("ns", "s"))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.create_secret(&existing).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        let key = ObjectKey::new("ns", "missing");
        assert!(matches!(
            store.delete_secret(&key).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!store.delete_secret(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_export_bumps_generation_only_on_change() {
        let store = MemoryStore::new();
        let spec = SecretExportSpec {
            to_namespaces: vec!["a".to_string()],
            ..Default::default()
        };
        let first = store.put_export("src", "s", spec.clone()).await;
        let same = store.put_export("src", "s", spec).await;
        assert_eq!(first.metadata.generation, same.metadata.generation);

        let changed = store
            .put_export(
                "src",
                "s",
                SecretExportSpec {
                    to_namespaces: vec!["b".to_string()],
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(changed.metadata.generation, Some(2));
    }
}
