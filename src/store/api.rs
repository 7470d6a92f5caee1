//! # Kubernetes API Store
//!
//! [`ClusterStore`] backed by `kube::Api`.

use super::{ClusterStore, NamespaceMetadata, ObjectKey, StoreError};
use crate::constants::CONTROLLER_NAME;
use crate::crd::{SecretExport, SecretImport, ShareStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(CONTROLLER_NAME.to_string()),
        }
    }
}

/// Map 409, 404 and 422 write failures to their store variants
fn map_write_error(err: kube::Error, kind: &'static str, key: &ObjectKey) -> StoreError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            kind,
            key: key.clone(),
        },
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
            kind,
            key: key.clone(),
        },
        kube::Error::Api(api_err) if api_err.code == 422 => StoreError::Invalid {
            kind,
            key: key.clone(),
            reason: api_err.message,
        },
        other => StoreError::Kube(other),
    }
}

fn secret_key(secret: &Secret) -> Result<ObjectKey, StoreError> {
    ObjectKey::of(secret).ok_or_else(|| {
        StoreError::Unavailable("Secret is missing metadata.name or metadata.namespace".to_string())
    })
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceMetadata>, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.as_ref().map(NamespaceMetadata::from))
    }

    async fn get_export(&self, key: &ObjectKey) -> Result<Option<SecretExport>, StoreError> {
        let api: Api<SecretExport> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list_exports(&self) -> Result<Vec<SecretExport>, StoreError> {
        let api: Api<SecretExport> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_import(&self, key: &ObjectKey) -> Result<Option<SecretImport>, StoreError> {
        let api: Api<SecretImport> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list_imports(&self) -> Result<Vec<SecretImport>, StoreError> {
        let api: Api<SecretImport> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, StoreError> {
        Ok(self.secrets(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let key = secret_key(secret)?;
        debug!(secret = %key, "Creating secret");
        self.secrets(&key.namespace)
            .create(&Self::post_params(), secret)
            .await
            .map_err(|e| map_write_error(e, "Secret", &key))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let key = secret_key(secret)?;
        debug!(secret = %key, "Replacing secret");
        // PUT semantics: keys absent from the body are removed, and a stale
        // resourceVersion is rejected with 409
        self.secrets(&key.namespace)
            .replace(&key.name, &Self::post_params(), secret)
            .await
            .map_err(|e| map_write_error(e, "Secret", &key))
    }

    async fn delete_secret(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        match self
            .secrets(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(map_write_error(e, "Secret", key)),
        }
    }

    async fn patch_export_status(
        &self,
        key: &ObjectKey,
        status: &ShareStatus,
    ) -> Result<(), StoreError> {
        let api: Api<SecretExport> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &key.name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(patch),
        )
        .await
        .map_err(|e| map_write_error(e, "SecretExport", key))?;
        Ok(())
    }

    async fn patch_import_status(
        &self,
        key: &ObjectKey,
        status: &ShareStatus,
    ) -> Result<(), StoreError> {
        let api: Api<SecretImport> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &key.name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(patch),
        )
        .await
        .map_err(|e| map_write_error(e, "SecretImport", key))?;
        Ok(())
    }
}
