//! Cleanup Operator - garbage collection for unreferenced ConfigMaps and Secrets
//!
//! The operator watches `Cleanup` custom resources. Each one names a set of
//! namespaces; on a schedule, or when triggered by hand, the operator traces
//! every reference from workloads to ConfigMaps and Secrets in those
//! namespaces and deletes (or, in dry-run, reports) the ones nothing uses.
//!
//! # Architecture
//!
//! A cycle is a mark-and-sweep pass over live cluster state:
//! - Roots are live Pods, the pod templates of Deployments, DaemonSets and
//!   StatefulSets, and ServiceAccounts
//! - Everything a root references is reachable and kept
//! - Unreachable resources that are old enough and not excluded are deleted
//!
//! # Modules
//!
//! - [`crd`] - The `Cleanup` Custom Resource Definition
//! - [`gc`] - Reference extraction, reachability, selection and deletion
//! - [`controller`] - Reconciliation, scheduling and single-flight dispatch
//! - [`cluster`] - Cluster API access behind a mockable trait
//! - [`config`] - Configuration resolution (file, environment, defaults)
//! - [`health`] - Liveness/readiness predicate and HTTP endpoints
//! - [`retry`] - Bounded retries with backoff for API calls
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod gc;
pub mod health;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Annotation whose value change triggers a cycle
pub const TRIGGER_ANNOTATION: &str = "cleanup.operator/trigger";

/// Field manager name for status writes and CRD installation
pub const FIELD_MANAGER: &str = "cleanup-operator";

/// Namespace scanned when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Seconds between scheduled cycles
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

/// Minimum age in hours before an unreferenced resource is deleted
pub const DEFAULT_UNUSED_THRESHOLD_HOURS: u32 = 2;

/// Dry-run unless told otherwise
pub const DEFAULT_DRY_RUN: bool = true;

/// Names never collected unless the configuration says otherwise
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["kube-*", "default-token-*"];

/// Deadline for a single cluster API call
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Namespaces scanned, and deletes issued, in parallel
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Attempts per scan or delete call, including the first
pub const DEFAULT_DELETE_ATTEMPTS: u32 = 3;

/// Conflict retries when writing Cleanup status
pub const DEFAULT_STATUS_RETRIES: u32 = 5;

/// Intervals without progress before liveness fails
pub const DEFAULT_HEALTH_MULTIPLIER: u32 = 3;

/// Default address for the health server
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Default path of the mounted config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cleanup-operator/config.yaml";
