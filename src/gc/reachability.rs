//! Reachability Builder
//!
//! Unions the references of every root in a namespace. A resource is
//! reachable if any root references it.

use std::collections::{HashMap, HashSet};

use super::references::{ReferenceSurface, WorkloadRoot};
use crate::crd::ResourceKind;

/// Per-namespace set of (kind, name) pairs with at least one inbound reference
#[derive(Clone, Debug, Default)]
pub struct ReachabilitySet {
    reachable: HashMap<ResourceKind, HashMap<String, HashSet<ReferenceSurface>>>,
    roots: usize,
}

impl ReachabilitySet {
    /// Build the set from every root found in one namespace
    pub fn from_roots<'a>(roots: impl IntoIterator<Item = &'a WorkloadRoot>) -> Self {
        let mut set = Self::default();
        for root in roots {
            set.add_root(root);
        }
        set
    }

    /// Add one root's references
    pub fn add_root(&mut self, root: &WorkloadRoot) {
        self.roots += 1;
        for edge in root.references() {
            self.reachable
                .entry(edge.kind)
                .or_default()
                .entry(edge.name)
                .or_default()
                .insert(edge.surface);
        }
    }

    /// Whether any root references this resource
    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.surfaces(kind, name).is_some()
    }

    /// Surfaces through which this resource is referenced
    pub fn surfaces(&self, kind: ResourceKind, name: &str) -> Option<&HashSet<ReferenceSurface>> {
        self.reachable.get(&kind)?.get(name)
    }

    /// Number of distinct reachable resources
    pub fn len(&self) -> usize {
        self.reachable.values().map(HashMap::len).sum()
    }

    /// True if nothing is reachable
    pub fn is_empty(&self) -> bool {
        self.reachable.values().all(HashMap::is_empty)
    }

    /// Number of roots folded into this set
    pub fn root_count(&self) -> usize {
        self.roots
    }
}
