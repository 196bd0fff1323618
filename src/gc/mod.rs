//! Reference-tracing garbage collection for ConfigMaps and Secrets
//!
//! A mark-and-sweep pass over live cluster state:
//!
//! - [`references`] - extract the ConfigMap/Secret names one workload root uses
//! - [`reachability`] - union those references into a per-namespace reachable set
//! - [`inventory`] - the ConfigMaps and Secrets that actually exist
//! - [`selector`] - inventory minus reachable, filtered by exclusions and age
//! - [`executor`] - delete (or pretend to) what is left
//!
//! Everything here is computed fresh each cycle and never persisted.

pub mod executor;
pub mod inventory;
pub mod pattern;
pub mod reachability;
pub mod references;
pub mod selector;

use chrono::{DateTime, Utc};

use crate::crd::ResourceKind;

pub use executor::{execute, ExecutorConfig};
pub use inventory::{InventoryScan, NamespaceScan};
pub use reachability::ReachabilitySet;
pub use references::{ReferenceEdge, ReferenceSurface, RootKind, WorkloadRoot};
pub use selector::{select, Selection, SelectionPolicy};

/// A ConfigMap or Secret observed during an inventory scan
///
/// Immutable snapshot; identity is (namespace, kind, name).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedResource {
    /// ConfigMap or Secret
    pub kind: ResourceKind,
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
    /// `metadata.uid`, used as a delete precondition when known
    pub uid: Option<String>,
    /// `metadata.creationTimestamp`; resources without one are treated as brand new
    pub created: Option<DateTime<Utc>>,
    /// Secret `type` field (None for ConfigMaps)
    pub secret_type: Option<String>,
}

impl ManagedResource {
    /// Create a ConfigMap snapshot
    pub fn config_map(namespace: &str, name: &str, created: Option<DateTime<Utc>>) -> Self {
        Self {
            kind: ResourceKind::ConfigMap,
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: None,
            created,
            secret_type: None,
        }
    }

    /// Create a Secret snapshot
    pub fn secret(namespace: &str, name: &str, created: Option<DateTime<Utc>>) -> Self {
        Self {
            kind: ResourceKind::Secret,
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: None,
            created,
            secret_type: None,
        }
    }

    /// Set the Secret type and return self for chaining
    pub fn with_secret_type(mut self, type_: impl Into<String>) -> Self {
        self.secret_type = Some(type_.into());
        self
    }

    /// Set the uid and return self for chaining
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// The (kind, name) key this resource is looked up by within its namespace
    pub fn key(&self) -> (ResourceKind, &str) {
        (self.kind, &self.name)
    }
}

impl std::fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
