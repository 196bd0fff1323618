//! Reference extraction from workload roots
//!
//! A workload root is anything that can keep a ConfigMap or Secret alive:
//! a running Pod, the pod template of a Deployment, DaemonSet or
//! StatefulSet (so a controller scaled to zero still protects its config),
//! or a ServiceAccount (which pins token and image-pull secrets on its own).
//!
//! Extraction is a pure function per root kind. Every optional substructure
//! is treated as empty when absent; nothing here can fail.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    EnvFromSource, EnvVar, LocalObjectReference, Pod, PodSpec, ServiceAccount, Volume,
};
use kube::ResourceExt;

use crate::crd::ResourceKind;

/// Kind of workload root
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootKind {
    /// A live Pod
    Pod,
    /// A Deployment's pod template
    Deployment,
    /// A DaemonSet's pod template
    DaemonSet,
    /// A StatefulSet's pod template
    StatefulSet,
    /// A ServiceAccount
    ServiceAccount,
}

impl std::fmt::Display for RootKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::ServiceAccount => "ServiceAccount",
        };
        f.write_str(s)
    }
}

/// How a root refers to a ConfigMap or Secret
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceSurface {
    /// `volumes[].configMap` / `volumes[].secret`
    Volume,
    /// `volumes[].projected.sources[]`
    ProjectedVolume,
    /// `env[].valueFrom.{configMapKeyRef,secretKeyRef}`
    EnvValueFrom,
    /// `envFrom[].{configMapRef,secretRef}`
    EnvFrom,
    /// `imagePullSecrets[]` on a pod spec or ServiceAccount
    ImagePullSecret,
    /// `secrets[]` on a ServiceAccount
    ServiceAccountSecret,
}

/// "ConfigMap/Secret `name` is used by this root via `surface`"
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceEdge {
    /// Kind of the referenced resource
    pub kind: ResourceKind,
    /// Name of the referenced resource (same namespace as the root)
    pub name: String,
    /// Field the reference was found in
    pub surface: ReferenceSurface,
}

impl ReferenceEdge {
    fn new(kind: ResourceKind, name: &str, surface: ReferenceSurface) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            name: name.to_string(),
            surface,
        })
    }
}

/// An object that can reference ConfigMaps and Secrets
#[derive(Clone, Debug)]
pub enum WorkloadRoot {
    /// A live Pod
    Pod(Pod),
    /// A Deployment (its template is the root, regardless of replicas)
    Deployment(Deployment),
    /// A DaemonSet (its template is the root)
    DaemonSet(DaemonSet),
    /// A StatefulSet (its template is the root)
    StatefulSet(StatefulSet),
    /// A ServiceAccount
    ServiceAccount(ServiceAccount),
}

impl WorkloadRoot {
    /// Kind of this root
    pub fn kind(&self) -> RootKind {
        match self {
            Self::Pod(_) => RootKind::Pod,
            Self::Deployment(_) => RootKind::Deployment,
            Self::DaemonSet(_) => RootKind::DaemonSet,
            Self::StatefulSet(_) => RootKind::StatefulSet,
            Self::ServiceAccount(_) => RootKind::ServiceAccount,
        }
    }

    /// Name of this root
    pub fn name(&self) -> String {
        match self {
            Self::Pod(o) => o.name_any(),
            Self::Deployment(o) => o.name_any(),
            Self::DaemonSet(o) => o.name_any(),
            Self::StatefulSet(o) => o.name_any(),
            Self::ServiceAccount(o) => o.name_any(),
        }
    }

    /// Every ConfigMap/Secret reference this root carries
    ///
    /// May contain duplicates when the same resource is used via several
    /// surfaces; callers that need a set should collect into one.
    pub fn references(&self) -> Vec<ReferenceEdge> {
        match self {
            Self::Pod(pod) => pod_spec_references(pod.spec.as_ref()),
            Self::Deployment(d) => pod_spec_references(
                d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            ),
            Self::DaemonSet(ds) => pod_spec_references(
                ds.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            ),
            Self::StatefulSet(sts) => pod_spec_references(
                sts.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            ),
            Self::ServiceAccount(sa) => service_account_references(sa),
        }
    }
}

impl From<Pod> for WorkloadRoot {
    fn from(o: Pod) -> Self {
        Self::Pod(o)
    }
}

impl From<Deployment> for WorkloadRoot {
    fn from(o: Deployment) -> Self {
        Self::Deployment(o)
    }
}

impl From<DaemonSet> for WorkloadRoot {
    fn from(o: DaemonSet) -> Self {
        Self::DaemonSet(o)
    }
}

impl From<StatefulSet> for WorkloadRoot {
    fn from(o: StatefulSet) -> Self {
        Self::StatefulSet(o)
    }
}

impl From<ServiceAccount> for WorkloadRoot {
    fn from(o: ServiceAccount) -> Self {
        Self::ServiceAccount(o)
    }
}

/// References from a pod spec: volumes, every container's env/envFrom
/// (regular, init and ephemeral), and image pull secrets.
pub fn pod_spec_references(spec: Option<&PodSpec>) -> Vec<ReferenceEdge> {
    let Some(spec) = spec else {
        return Vec::new();
    };

    let mut edges = Vec::new();

    for volume in spec.volumes.iter().flatten() {
        volume_references(volume, &mut edges);
    }

    for c in spec.containers.iter() {
        env_references(c.env.as_deref(), c.env_from.as_deref(), &mut edges);
    }
    for c in spec.init_containers.iter().flatten() {
        env_references(c.env.as_deref(), c.env_from.as_deref(), &mut edges);
    }
    for c in spec.ephemeral_containers.iter().flatten() {
        env_references(c.env.as_deref(), c.env_from.as_deref(), &mut edges);
    }

    image_pull_references(spec.image_pull_secrets.as_deref(), &mut edges);

    edges
}

fn volume_references(volume: &Volume, edges: &mut Vec<ReferenceEdge>) {
    use ReferenceSurface::{ProjectedVolume, Volume as Vol};

    if let Some(cm) = &volume.config_map {
        edges.extend(ReferenceEdge::new(ResourceKind::ConfigMap, &cm.name, Vol));
    }
    if let Some(name) = volume.secret.as_ref().and_then(|s| s.secret_name.as_deref()) {
        edges.extend(ReferenceEdge::new(ResourceKind::Secret, name, Vol));
    }

    let sources = volume
        .projected
        .as_ref()
        .and_then(|p| p.sources.as_deref())
        .unwrap_or_default();
    for source in sources {
        if let Some(cm) = &source.config_map {
            edges.extend(ReferenceEdge::new(
                ResourceKind::ConfigMap,
                &cm.name,
                ProjectedVolume,
            ));
        }
        if let Some(secret) = &source.secret {
            edges.extend(ReferenceEdge::new(
                ResourceKind::Secret,
                &secret.name,
                ProjectedVolume,
            ));
        }
    }
}

fn env_references(
    env: Option<&[EnvVar]>,
    env_from: Option<&[EnvFromSource]>,
    edges: &mut Vec<ReferenceEdge>,
) {
    for var in env.unwrap_or_default() {
        let Some(source) = &var.value_from else {
            continue;
        };
        if let Some(r) = &source.config_map_key_ref {
            edges.extend(ReferenceEdge::new(
                ResourceKind::ConfigMap,
                &r.name,
                ReferenceSurface::EnvValueFrom,
            ));
        }
        if let Some(r) = &source.secret_key_ref {
            edges.extend(ReferenceEdge::new(
                ResourceKind::Secret,
                &r.name,
                ReferenceSurface::EnvValueFrom,
            ));
        }
    }

    for source in env_from.unwrap_or_default() {
        if let Some(r) = &source.config_map_ref {
            edges.extend(ReferenceEdge::new(
                ResourceKind::ConfigMap,
                &r.name,
                ReferenceSurface::EnvFrom,
            ));
        }
        if let Some(r) = &source.secret_ref {
            edges.extend(ReferenceEdge::new(
                ResourceKind::Secret,
                &r.name,
                ReferenceSurface::EnvFrom,
            ));
        }
    }
}

fn image_pull_references(refs: Option<&[LocalObjectReference]>, edges: &mut Vec<ReferenceEdge>) {
    for r in refs.unwrap_or_default() {
        edges.extend(ReferenceEdge::new(
            ResourceKind::Secret,
            &r.name,
            ReferenceSurface::ImagePullSecret,
        ));
    }
}

/// References pinned by a ServiceAccount: `secrets[]` and `imagePullSecrets[]`
pub fn service_account_references(sa: &ServiceAccount) -> Vec<ReferenceEdge> {
    let mut edges = Vec::new();
    for r in sa.secrets.iter().flatten() {
        if let Some(name) = r.name.as_deref() {
            edges.extend(ReferenceEdge::new(
                ResourceKind::Secret,
                name,
                ReferenceSurface::ServiceAccountSecret,
            ));
        }
    }
    image_pull_references(sa.image_pull_secrets.as_deref(), &mut edges);
    edges
}
