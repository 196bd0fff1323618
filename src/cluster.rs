//! Cluster API access
//!
//! Everything the garbage collector and the cycle controller need from the
//! API server goes through [`ClusterApi`], so the core can be driven by a
//! mock or an in-memory fake in tests and by [`KubeCluster`] in production.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, Preconditions};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Cleanup, CleanupStatus, ResourceKind};
use crate::gc::{ManagedResource, WorkloadRoot};
use crate::{Error, FIELD_MANAGER};

/// Page size for list calls
const LIST_PAGE_SIZE: u32 = 500;

/// Trait abstracting the cluster operations the operator performs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every workload root in a namespace: Pods, Deployments,
    /// DaemonSets, StatefulSets and ServiceAccounts
    async fn list_workload_roots(&self, namespace: &str) -> Result<Vec<WorkloadRoot>, Error>;

    /// List every ConfigMap and Secret in a namespace
    async fn list_managed_resources(&self, namespace: &str)
        -> Result<Vec<ManagedResource>, Error>;

    /// Delete one ConfigMap or Secret
    ///
    /// When the resource carries a uid it is sent as a precondition, so an
    /// object recreated under the same name is left alone (409).
    async fn delete_resource(&self, resource: &ManagedResource) -> Result<(), Error>;

    /// Fetch a Cleanup object
    async fn get_cleanup(&self, namespace: &str, name: &str) -> Result<Cleanup, Error>;

    /// Replace the status of a Cleanup object
    ///
    /// # Arguments
    ///
    /// * `resource_version` - when set, the write fails with 409 if the
    ///   object changed since it was read
    async fn patch_cleanup_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &CleanupStatus,
    ) -> Result<Cleanup, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Create a new KubeCluster wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// List all objects, following continue tokens
async fn list_all<K>(api: &Api<K>) -> Result<Vec<K>, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    let mut items = Vec::new();
    let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
    loop {
        let page = api.list(&params).await?;
        items.extend(page.items);
        match page.metadata.continue_ {
            Some(token) if !token.is_empty() => {
                params = params.continue_token(&token);
            }
            _ => return Ok(items),
        }
    }
}

fn created_at(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    meta.creation_timestamp.as_ref().map(|t| t.0)
}

fn managed(kind: ResourceKind, namespace: &str, meta: &ObjectMeta) -> Option<ManagedResource> {
    let name = meta.name.as_deref()?;
    let created = created_at(meta);
    let resource = match kind {
        ResourceKind::ConfigMap => ManagedResource::config_map(namespace, name, created),
        ResourceKind::Secret => ManagedResource::secret(namespace, name, created),
    };
    Some(match meta.uid.as_deref() {
        Some(uid) => resource.with_uid(uid),
        None => resource,
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_workload_roots(&self, namespace: &str) -> Result<Vec<WorkloadRoot>, Error> {
        let pods: Api<Pod> = self.api(namespace);
        let deployments: Api<Deployment> = self.api(namespace);
        let daemonsets: Api<DaemonSet> = self.api(namespace);
        let statefulsets: Api<StatefulSet> = self.api(namespace);
        let service_accounts: Api<ServiceAccount> = self.api(namespace);

        let (pods, deployments, daemonsets, statefulsets, service_accounts) = futures::try_join!(
            list_all(&pods),
            list_all(&deployments),
            list_all(&daemonsets),
            list_all(&statefulsets),
            list_all(&service_accounts),
        )?;

        let mut roots = Vec::with_capacity(
            pods.len()
                + deployments.len()
                + daemonsets.len()
                + statefulsets.len()
                + service_accounts.len(),
        );
        roots.extend(pods.into_iter().map(WorkloadRoot::from));
        roots.extend(deployments.into_iter().map(WorkloadRoot::from));
        roots.extend(daemonsets.into_iter().map(WorkloadRoot::from));
        roots.extend(statefulsets.into_iter().map(WorkloadRoot::from));
        roots.extend(service_accounts.into_iter().map(WorkloadRoot::from));

        debug!(namespace = %namespace, roots = roots.len(), "listed workload roots");
        Ok(roots)
    }

    async fn list_managed_resources(
        &self,
        namespace: &str,
    ) -> Result<Vec<ManagedResource>, Error> {
        let config_maps: Api<ConfigMap> = self.api(namespace);
        let secrets: Api<Secret> = self.api(namespace);

        let (config_maps, secrets) =
            futures::try_join!(list_all(&config_maps), list_all(&secrets))?;

        let mut resources: Vec<ManagedResource> = config_maps
            .iter()
            .filter_map(|cm| managed(ResourceKind::ConfigMap, namespace, &cm.metadata))
            .collect();
        resources.extend(secrets.iter().filter_map(|s| {
            let resource = managed(ResourceKind::Secret, namespace, &s.metadata)?;
            Some(match s.type_.as_deref() {
                Some(t) => resource.with_secret_type(t),
                None => resource,
            })
        }));

        debug!(namespace = %namespace, resources = resources.len(), "listed inventory");
        Ok(resources)
    }

    async fn delete_resource(&self, resource: &ManagedResource) -> Result<(), Error> {
        let params = DeleteParams {
            preconditions: resource.uid.as_ref().map(|uid| Preconditions {
                uid: Some(uid.clone()),
                resource_version: None,
            }),
            ..Default::default()
        };

        match resource.kind {
            ResourceKind::ConfigMap => {
                let api: Api<ConfigMap> = self.api(&resource.namespace);
                api.delete(&resource.name, &params).await?;
            }
            ResourceKind::Secret => {
                let api: Api<Secret> = self.api(&resource.namespace);
                api.delete(&resource.name, &params).await?;
            }
        }
        Ok(())
    }

    async fn get_cleanup(&self, namespace: &str, name: &str) -> Result<Cleanup, Error> {
        let api: Api<Cleanup> = self.api(namespace);
        Ok(api.get(name).await?)
    }

    async fn patch_cleanup_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &CleanupStatus,
    ) -> Result<Cleanup, Error> {
        let api: Api<Cleanup> = self.api(namespace);

        // A resourceVersion in a merge patch makes the server reject the
        // write if the object moved on.
        let status_patch = match resource_version {
            Some(rv) => serde_json::json!({
                "metadata": { "resourceVersion": rv },
                "status": status
            }),
            None => serde_json::json!({ "status": status }),
        };

        let updated = api
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn managed_resource_from_metadata() {
        let created = Utc::now();
        let meta = ObjectMeta {
            name: Some("app-config".into()),
            uid: Some("1234".into()),
            creation_timestamp: Some(Time(created)),
            ..Default::default()
        };
        let resource = managed(ResourceKind::ConfigMap, "default", &meta).unwrap();
        assert_eq!(resource.kind, ResourceKind::ConfigMap);
        assert_eq!(resource.namespace, "default");
        assert_eq!(resource.name, "app-config");
        assert_eq!(resource.uid.as_deref(), Some("1234"));
        assert_eq!(resource.created, Some(created));
    }

    #[test]
    fn nameless_metadata_is_skipped() {
        assert!(managed(ResourceKind::Secret, "default", &ObjectMeta::default()).is_none());
    }
}
