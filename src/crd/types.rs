//! Supporting types for the Cleanup CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of object subject to cleanup
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum ResourceKind {
    /// core/v1 ConfigMap
    ConfigMap,
    /// core/v1 Secret
    Secret,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::Secret => write!(f, "Secret"),
        }
    }
}

/// What happened (or would have happened) to one resource during a cycle
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Deleted, or already gone when the delete was issued
    Deleted,
    /// Would have been deleted; the cycle ran in dry-run mode
    WouldDelete,
    /// Protected by an exclusion pattern or a built-in exclusion
    SkippedExcluded,
    /// Younger than the age threshold
    SkippedTooYoung,
    /// Referenced by at least one workload root
    SkippedReferenced,
    /// The delete call failed; see the result's `error`
    Failed,
}

impl Outcome {
    /// All outcomes, in reporting order
    pub const ALL: [Outcome; 6] = [
        Outcome::Deleted,
        Outcome::WouldDelete,
        Outcome::SkippedExcluded,
        Outcome::SkippedTooYoung,
        Outcome::SkippedReferenced,
        Outcome::Failed,
    ];
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deleted => "deleted",
            Self::WouldDelete => "would-delete",
            Self::SkippedExcluded => "skipped-excluded",
            Self::SkippedTooYoung => "skipped-too-young",
            Self::SkippedReferenced => "skipped-referenced",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cycle lifecycle state reported in status
///
/// Idle -> Running -> Completed | Failed -> Idle
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle active
    #[default]
    Idle,
    /// A cycle is scanning or deleting
    Running,
    /// The last cycle scanned every namespace it could
    Completed,
    /// The last cycle hit a fatal condition
    Failed,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Per-resource line in the cycle report
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    /// ConfigMap or Secret
    pub kind: ResourceKind,
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
    /// What happened to it
    pub outcome: Outcome,
    /// Error detail, set only when `outcome` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A namespace that could not be scanned this cycle
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceError {
    /// Namespace that failed
    pub namespace: String,
    /// Why it failed
    pub error: String,
}

/// Outcome counts for one cycle
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    /// Resources deleted
    pub deleted: u32,
    /// Resources that would have been deleted (dry-run)
    pub would_delete: u32,
    /// Resources protected by exclusions
    pub skipped_excluded: u32,
    /// Resources younger than the threshold
    pub skipped_too_young: u32,
    /// Resources still referenced
    pub skipped_referenced: u32,
    /// Deletes that failed
    pub failed: u32,
}

impl CycleSummary {
    /// Tally a result list
    pub fn from_results(results: &[ResourceResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            let slot = match r.outcome {
                Outcome::Deleted => &mut summary.deleted,
                Outcome::WouldDelete => &mut summary.would_delete,
                Outcome::SkippedExcluded => &mut summary.skipped_excluded,
                Outcome::SkippedTooYoung => &mut summary.skipped_too_young,
                Outcome::SkippedReferenced => &mut summary.skipped_referenced,
                Outcome::Failed => &mut summary.failed,
            };
            *slot += 1;
        }
        summary
    }
}
