//! Candidate Selector
//!
//! Classifies each inventoried resource. Checks run in a fixed order and the
//! first one that applies decides the reported outcome:
//!
//! 1. exclusion pattern or built-in exclusion -> `skipped-excluded`
//! 2. younger than the age threshold -> `skipped-too-young`
//! 3. referenced by any root -> `skipped-referenced`
//! 4. otherwise a deletion candidate
//!
//! Only the order of reporting depends on this; a resource is a candidate
//! only if it passes all three checks either way.

use chrono::{DateTime, Duration, Utc};

use super::inventory::NamespaceScan;
use super::pattern;
use super::ManagedResource;
use crate::crd::{Outcome, ResourceKind, ResourceResult};

/// Secret types that are owned by the platform and never collected
pub const PROTECTED_SECRET_TYPES: &[&str] = &[
    "kubernetes.io/service-account-token",
    "kubernetes.io/dockercfg",
    "kubernetes.io/dockerconfigjson",
];

/// Inputs the selector needs besides the scan itself
#[derive(Clone, Debug)]
pub struct SelectionPolicy {
    /// Reference time for age checks
    pub now: DateTime<Utc>,
    /// Minimum age before deletion; zero disables age protection
    pub threshold: Duration,
    /// Glob patterns matched against resource names
    pub exclude_patterns: Vec<String>,
}

impl SelectionPolicy {
    /// Policy with a threshold in whole hours
    pub fn new(now: DateTime<Utc>, threshold_hours: u32, exclude_patterns: Vec<String>) -> Self {
        Self {
            now,
            threshold: Duration::hours(i64::from(threshold_hours)),
            exclude_patterns,
        }
    }

    /// Excluded by a configured pattern or a built-in rule
    pub fn is_excluded(&self, resource: &ManagedResource) -> bool {
        pattern::matches_any(&self.exclude_patterns, &resource.name)
            || is_builtin_excluded(resource)
    }

    /// Younger than the threshold. Resources without a creation time count
    /// as brand new.
    pub fn is_too_young(&self, resource: &ManagedResource) -> bool {
        if self.threshold <= Duration::zero() {
            return false;
        }
        match resource.created {
            Some(created) => self.now - created < self.threshold,
            None => true,
        }
    }
}

/// Service-account tokens and registry credentials are never collected
fn is_builtin_excluded(resource: &ManagedResource) -> bool {
    if resource.kind != ResourceKind::Secret {
        return false;
    }
    if let Some(t) = resource.secret_type.as_deref() {
        if PROTECTED_SECRET_TYPES.contains(&t) {
            return true;
        }
    }
    resource.name.starts_with("default-token-") || resource.name.ends_with("-token")
}

/// Result of classifying one namespace
#[derive(Clone, Debug, Default)]
pub struct Selection {
    /// Outcomes of every resource that is not a candidate
    pub results: Vec<ResourceResult>,
    /// Resources to delete (or report as would-delete)
    pub candidates: Vec<ManagedResource>,
}

/// Classify every resource in a namespace scan
pub fn select(scan: &NamespaceScan, policy: &SelectionPolicy) -> Selection {
    let mut selection = Selection::default();

    for resource in &scan.inventory {
        let outcome = if policy.is_excluded(resource) {
            Outcome::SkippedExcluded
        } else if policy.is_too_young(resource) {
            Outcome::SkippedTooYoung
        } else if scan.reachable.contains(resource.kind, &resource.name) {
            Outcome::SkippedReferenced
        } else {
            selection.candidates.push(resource.clone());
            continue;
        };

        selection.results.push(ResourceResult {
            kind: resource.kind,
            namespace: resource.namespace.clone(),
            name: resource.name.clone(),
            outcome,
            error: None,
        });
    }

    selection
}
