//! # SecretExport Spec
//!
//! Export policy published by the namespace that owns a Secret.

use serde::{Deserialize, Serialize};

/// SecretExport Custom Resource Definition
///
/// Declares which namespaces may receive a copy of the Secret with the same name in
/// the export's namespace. The explicit list and the selector are alternatives: a
/// namespace is authorized when it is listed, or when it satisfies every clause.
///
/// # Example
///
/// ```yaml
/// apiVersion: secret-sharing.octopilot.io/v1alpha1
/// kind: SecretExport
/// metadata:
///   name: database-credentials
///   namespace: platform
/// spec:
///   toNamespaces:
///   - team-a
///   - team-b
///   selectorClauses:
///   - key: "metadata.annotations['field\\.cattle\\.io/projectId']"
///     operator: In
///     values:
///     - "cluster1:project1"
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "SecretExport",
    group = "secret-sharing.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ShareStatus",
    shortname = "sexport",
    printcolumn = r#"{"name":"Description", "type":"string", "jsonPath":".status.friendlyDescription"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretExportSpec {
    /// Namespaces allowed to import the Secret
    /// The entry "*" authorizes every namespace in the cluster
    #[serde(default)]
    pub to_namespaces: Vec<String>,
    /// Single namespace allowed to import the Secret (merged into `toNamespaces`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_namespace: Option<String>,
    /// Selector over namespace metadata; every clause must hold
    #[serde(default)]
    pub selector_clauses: Vec<SelectorClause>,
    /// Legacy name for `selectorClauses`; both lists are combined into one conjunction
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dangerous_to_namespaces_selector: Vec<SelectorClause>,
}

/// One requirement of a namespace selector
///
/// `operator` is kept as a plain string so that an unknown operator surfaces as a
/// status condition on the export instead of failing deserialization of the whole object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorClause {
    /// Field path, e.g. `metadata.labels.team` or `metadata.annotations['example\.com/tier']`
    pub key: String,
    /// One of In, NotIn, Exists, DoesNotExist
    pub operator: String,
    /// Values compared by In / NotIn; ignored by Exists / DoesNotExist
    #[serde(default)]
    pub values: Vec<String>,
}

impl SecretExportSpec {
    /// Explicit target namespaces in declaration order, `toNamespace` last, without duplicates
    #[must_use]
    pub fn explicit_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::with_capacity(self.to_namespaces.len() + 1);
        for ns in self
            .to_namespaces
            .iter()
            .chain(self.to_namespace.iter())
            .map(|s| s.trim())
        {
            if !ns.is_empty() && !targets.contains(&ns) {
                targets.push(ns);
            }
        }
        targets
    }

    /// `selectorClauses` followed by the legacy `dangerousToNamespacesSelector` clauses
    #[must_use]
    pub fn all_selector_clauses(&self) -> Vec<SelectorClause> {
        self.selector_clauses
            .iter()
            .chain(self.dangerous_to_namespaces_selector.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_targets_merges_single_entry() {
        let spec = SecretExportSpec {
            to_namespaces: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            to_namespace: Some("c".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.explicit_targets(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_legacy_selector_is_combined() {
        let spec: SecretExportSpec = serde_json::from_value(serde_json::json!({
            "selectorClauses": [
                {"key": "metadata.labels.team", "operator": "In", "values": ["a"]}
            ],
            "dangerousToNamespacesSelector": [
                {"key": "metadata.annotations.one", "operator": "Exists"}
            ]
        }))
        .unwrap();
        let clauses = spec.all_selector_clauses();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].operator, "In");
        assert_eq!(clauses[1].operator, "Exists");
        assert!(clauses[1].values.is_empty());
    }

    #[test]
    fn test_crd_schema_declares_both_selector_fields() {
        use kube::core::CustomResourceExt;

        let crd = serde_yaml::to_string(&SecretExport::crd()).unwrap();
        assert!(crd.contains("selectorClauses:"));
        assert!(crd.contains("dangerousToNamespacesSelector:"));
    }

    #[test]
    fn test_empty_spec_deserializes() {
        let spec: SecretExportSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.explicit_targets().is_empty());
        assert!(spec.selector_clauses.is_empty());
    }
}
