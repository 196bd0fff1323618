//! Cleanup Custom Resource Definition
//!
//! A `Cleanup` object declares which namespaces to garbage-collect and how
//! carefully. The controller owns its status and never touches its spec.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CycleState, CycleSummary, NamespaceError, ResourceResult};
use crate::TRIGGER_ANNOTATION;

/// Specification for a Cleanup request
///
/// Unset fields fall back to the operator's resolved configuration
/// (config file, then environment, then built-in defaults).
///
/// Example:
/// ```yaml
/// apiVersion: resources.example.com/v1
/// kind: Cleanup
/// metadata:
///   name: nightly
///   namespace: cleanup-system
/// spec:
///   namespaces: [default, staging]
///   unusedThresholdHours: 2
///   dryRun: true
///   excludePatterns: ["kube-*"]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "resources.example.com",
    version = "v1",
    kind = "Cleanup",
    plural = "cleanups",
    namespaced,
    status = "CleanupStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"DryRun","type":"boolean","jsonPath":".spec.dryRun"}"#,
    printcolumn = r#"{"name":"LastRun","type":"date","jsonPath":".status.lastRunEndTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSpec {
    /// Namespaces to scan; duplicates are ignored, order is kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,

    /// Minimum age in hours before an unreferenced resource may be deleted
    /// (0 disables age protection)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unused_threshold_hours: Option<u32>,

    /// Report what would be deleted without deleting anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    /// Run a cycle as soon as this spec generation is observed
    #[serde(default)]
    pub force: bool,

    /// Glob patterns (`*`, `?`) matched against resource names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
}

/// Status for a Cleanup request
///
/// Status is written as a JSON merge patch, so every field is always
/// serialized: an unset field goes out as `null` (or `[]`) and clears
/// whatever the previous cycle stored.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStatus {
    /// Current state of the cycle state machine
    #[serde(default)]
    pub state: CycleState,

    /// When the last cycle started
    #[serde(default)]
    pub last_run_start_time: Option<DateTime<Utc>>,

    /// When the last cycle finished
    #[serde(default)]
    pub last_run_end_time: Option<DateTime<Utc>>,

    /// Per-resource outcomes of the last cycle
    #[serde(default)]
    pub results: Vec<ResourceResult>,

    /// Namespaces the last cycle could not scan
    #[serde(default)]
    pub namespace_errors: Vec<NamespaceError>,

    /// Outcome counts of the last cycle
    #[serde(default)]
    pub summary: Option<CycleSummary>,

    /// Fatal error; set only when `state` is `Failed`
    #[serde(default)]
    pub error: Option<String>,

    /// Spec generation the last cycle ran against
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Trigger annotation value the last cycle consumed
    #[serde(default)]
    pub observed_trigger: Option<String>,
}

impl CleanupStatus {
    /// Create a new status with the given state
    pub fn with_state(state: CycleState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Set the fatal error and return self for chaining
    pub fn error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Set the results (and derived summary) and return self for chaining
    pub fn results(mut self, results: Vec<ResourceResult>) -> Self {
        self.summary = Some(CycleSummary::from_results(&results));
        self.results = results;
        self
    }
}

impl Cleanup {
    /// Current value of the manual-trigger annotation, if set
    pub fn trigger_token(&self) -> Option<&str> {
        self.annotations()
            .get(TRIGGER_ANNOTATION)
            .map(String::as_str)
    }

    /// Start time of the last cycle recorded in status
    pub fn last_run_start(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.last_run_start_time)
    }

    /// Reported state, Idle if no status has been written yet
    pub fn state(&self) -> CycleState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
