//! Inventory Scanner
//!
//! Scans one namespace: the ConfigMaps and Secrets that exist, and the
//! roots that reference them. Both lists are fetched concurrently and each
//! goes through the retrying, time-bounded call path.

use tracing::{debug, warn};

use super::reachability::ReachabilitySet;
use super::ManagedResource;
use crate::cluster::ClusterApi;
use crate::retry::{call_with_retry, RetryConfig};
use crate::Error;

/// Everything a namespace contributed to one cycle
#[derive(Clone, Debug)]
pub struct NamespaceScan {
    /// Namespace that was scanned
    pub namespace: String,
    /// ConfigMaps and Secrets present at scan time
    pub inventory: Vec<ManagedResource>,
    /// What the namespace's roots reference
    pub reachable: ReachabilitySet,
}

/// Scans namespaces through a [`ClusterApi`]
pub struct InventoryScan<'a> {
    cluster: &'a dyn ClusterApi,
    retry: &'a RetryConfig,
}

impl<'a> InventoryScan<'a> {
    /// Create a scanner over the given cluster
    pub fn new(cluster: &'a dyn ClusterApi, retry: &'a RetryConfig) -> Self {
        Self { cluster, retry }
    }

    /// Scan one namespace
    ///
    /// Fails as a whole if either list fails: without the full root set
    /// nothing in the namespace can be proven unreferenced.
    pub async fn scan(&self, namespace: &str) -> Result<NamespaceScan, Error> {
        let list_inventory = call_with_retry(self.retry, "list configmaps and secrets", || {
            self.cluster.list_managed_resources(namespace)
        });
        let list_roots = call_with_retry(self.retry, "list workload roots", || {
            self.cluster.list_workload_roots(namespace)
        });

        let (inventory, roots) = match futures::try_join!(list_inventory, list_roots) {
            Ok(lists) => lists,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "namespace scan failed");
                return Err(e);
            }
        };

        let reachable = ReachabilitySet::from_roots(&roots);
        debug!(
            namespace = %namespace,
            resources = inventory.len(),
            roots = reachable.root_count(),
            reachable = reachable.len(),
            "namespace scanned"
        );

        Ok(NamespaceScan {
            namespace: namespace.to_string(),
            inventory,
            reachable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::crd::ResourceKind;
    use crate::error::api_error;
    use crate::gc::WorkloadRoot;
    use k8s_openapi::api::core::v1::{LocalObjectReference, ServiceAccount};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn scan_combines_inventory_and_roots() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_list_managed_resources()
            .withf(|ns| ns == "default")
            .returning(|ns| {
                Ok(vec![
                    ManagedResource::secret(ns, "registry", None),
                    ManagedResource::config_map(ns, "orphan", None),
                ])
            });
        cluster.expect_list_workload_roots().returning(|_| {
            Ok(vec![WorkloadRoot::from(ServiceAccount {
                image_pull_secrets: Some(vec![LocalObjectReference {
                    name: "registry".into(),
                }]),
                ..Default::default()
            })])
        });

        let retry = fast_retry();
        let scan = InventoryScan::new(&cluster, &retry)
            .scan("default")
            .await
            .unwrap();
        assert_eq!(scan.namespace, "default");
        assert_eq!(scan.inventory.len(), 2);
        assert!(scan.reachable.contains(ResourceKind::Secret, "registry"));
        assert!(!scan.reachable.contains(ResourceKind::ConfigMap, "orphan"));
    }

    #[tokio::test]
    async fn forbidden_root_listing_fails_the_namespace() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_list_managed_resources()
            .returning(|_| Ok(vec![]));
        cluster
            .expect_list_workload_roots()
            .times(1)
            .returning(|_| Err(api_error(403, "Forbidden")));

        let retry = fast_retry();
        let err = InventoryScan::new(&cluster, &retry)
            .scan("locked")
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
    }

    #[tokio::test]
    async fn transient_list_failures_are_retried() {
        let mut cluster = MockClusterApi::new();
        let mut calls = 0;
        cluster
            .expect_list_managed_resources()
            .times(2)
            .returning(move |ns| {
                calls += 1;
                if calls == 1 {
                    Err(api_error(503, "ServiceUnavailable"))
                } else {
                    Ok(vec![ManagedResource::secret(ns, "s", None)])
                }
            });
        cluster
            .expect_list_workload_roots()
            .returning(|_| Ok(vec![]));

        let retry = fast_retry();
        let scan = InventoryScan::new(&cluster, &retry)
            .scan("default")
            .await
            .unwrap();
        assert_eq!(scan.inventory.len(), 1);
    }
}
