//! # SecretImport Spec
//!
//! Import declared by a consumer namespace.

use serde::{Deserialize, Serialize};

/// SecretImport Custom Resource Definition
///
/// Requests a copy of the Secret named like this import from `fromNamespace`.
/// The copy is created in the import's namespace under the import's name, and only
/// while the SecretExport of the same name in `fromNamespace` authorizes this namespace.
///
/// # Example
///
/// ```yaml
/// apiVersion: secret-sharing.octopilot.io/v1alpha1
/// kind: SecretImport
/// metadata:
///   name: database-credentials
///   namespace: team-a
/// spec:
///   fromNamespace: platform
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "SecretImport",
    group = "secret-sharing.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ShareStatus",
    shortname = "simport",
    printcolumn = r#"{"name":"From", "type":"string", "jsonPath":".spec.fromNamespace"}, {"name":"Description", "type":"string", "jsonPath":".status.friendlyDescription"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretImportSpec {
    /// Namespace holding the Secret and its SecretExport
    #[serde(default)]
    pub from_namespace: String,
}
