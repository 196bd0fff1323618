//! Cleanup Executor
//!
//! Deletes candidates with bounded concurrency. Each delete stands alone:
//! a failure is recorded against that resource and the rest of the batch
//! carries on.

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::ManagedResource;
use crate::cluster::ClusterApi;
use crate::crd::{Outcome, ResourceResult};
use crate::retry::{call_with_retry, RetryConfig};

/// How the executor runs
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Report would-delete instead of deleting
    pub dry_run: bool,
    /// Maximum deletes in flight
    pub concurrency: usize,
    /// Retry policy for each delete call
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            concurrency: crate::DEFAULT_MAX_CONCURRENCY,
            retry: RetryConfig::default(),
        }
    }
}

fn result(resource: &ManagedResource, outcome: Outcome, error: Option<String>) -> ResourceResult {
    ResourceResult {
        kind: resource.kind,
        namespace: resource.namespace.clone(),
        name: resource.name.clone(),
        outcome,
        error,
    }
}

/// Delete one candidate, mapping the API response to an outcome
async fn delete_one(
    cluster: &dyn ClusterApi,
    resource: &ManagedResource,
    retry: &RetryConfig,
) -> ResourceResult {
    let op = format!("delete {}", resource);
    match call_with_retry(retry, &op, || cluster.delete_resource(resource)).await {
        Ok(()) => {
            info!(
                kind = %resource.kind,
                namespace = %resource.namespace,
                name = %resource.name,
                "deleted unused resource"
            );
            result(resource, Outcome::Deleted, None)
        }
        // Someone else got there first
        Err(e) if e.is_not_found() => {
            info!(
                kind = %resource.kind,
                namespace = %resource.namespace,
                name = %resource.name,
                "resource already gone"
            );
            result(resource, Outcome::Deleted, None)
        }
        Err(e) => {
            warn!(
                kind = %resource.kind,
                namespace = %resource.namespace,
                name = %resource.name,
                error = %e,
                "failed to delete resource"
            );
            result(resource, Outcome::Failed, Some(e.to_string()))
        }
    }
}

/// Delete (or, in dry-run, report) every candidate
///
/// Returns one result per candidate, in no particular order.
pub async fn execute(
    cluster: &dyn ClusterApi,
    candidates: Vec<ManagedResource>,
    config: &ExecutorConfig,
) -> Vec<ResourceResult> {
    if config.dry_run {
        return candidates
            .iter()
            .map(|resource| {
                info!(
                    kind = %resource.kind,
                    namespace = %resource.namespace,
                    name = %resource.name,
                    dry_run = true,
                    "would delete unused resource"
                );
                result(resource, Outcome::WouldDelete, None)
            })
            .collect();
    }

    stream::iter(candidates)
        .map(|resource| async move { delete_one(cluster, &resource, &config.retry).await })
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await
}
