//! Controller for Cleanup resources
//!
//! - [`cleanup`] - kube-runtime `reconcile`/`error_policy` and trigger detection
//! - [`dispatcher`] - single-flight gate with rerun coalescing
//! - [`cycle`] - one scan/select/execute pass across namespaces
//! - [`status`] - status write-back with conflict retries

pub mod cleanup;
pub mod cycle;
pub mod dispatcher;
pub mod status;

pub use cleanup::{
    cleanup_key, error_policy, pending_trigger, reconcile, run_once, spawn_worker, Context,
    CycleEnd, Trigger,
};
pub use cycle::{run_cycle, CycleReport};
pub use dispatcher::{Admission, CycleMark, Dispatcher};
pub use status::{write_status, StatusWrite};
