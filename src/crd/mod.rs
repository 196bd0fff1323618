//! Custom Resource Definitions for the cleanup operator
//!
//! This module contains the `Cleanup` CRD and the vocabulary its status
//! uses to report cycle results.

mod cleanup;
mod types;

pub use cleanup::{Cleanup, CleanupSpec, CleanupStatus};
pub use types::{
    CycleState, CycleSummary, NamespaceError, Outcome, ResourceKind, ResourceResult,
};
