//! # Status
//!
//! Status shared by SecretExport and SecretImport.

use serde::{Deserialize, Serialize};

/// Status of a SecretExport or SecretImport
///
/// Written after every reconcile pass that changes it.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareStatus {
    /// Generation of the spec observed by the last reconcile
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Human-readable summary of the current state
    /// Examples: "Exported to 3 namespace(s)", "Import does not match any export"
    #[serde(default)]
    pub friendly_description: Option<String>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl ShareStatus {
    /// The `Ready` condition, if one was recorded
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == "Ready")
    }

    /// Reason of the `Ready` condition, if one was recorded
    #[must_use]
    pub fn ready_reason(&self) -> Option<&str> {
        self.ready_condition().and_then(|c| c.reason.as_deref())
    }
}
