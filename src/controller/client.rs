//! Cluster access used by the reconciliation engine
//!
//! The engine only talks to the cluster through [`ClusterClient`], which keeps
//! the stages testable without an API server.

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, ObjectMeta,
    Patch, PatchParams,
};
use kube::discovery::{self, ApiCapabilities, Scope};
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::crd::{ComponentKind, KnativeEventing, KnativeServing};
use crate::manifest::ResourceId;

/// Field manager used for server-side apply and patches
pub const FIELD_MANAGER: &str = "knative-operator";

/// Minimal view of a component instance used to gate uninstall
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSummary {
    pub namespace: Option<String>,
    pub name: String,
    pub deleting: bool,
}

impl InstanceSummary {
    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.meta().namespace.clone(),
            name: obj.meta().name.clone().unwrap_or_default(),
            deleting: obj.meta().deletion_timestamp.is_some(),
        }
    }
}

/// Cluster operations consumed by the reconciliation engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Server-side apply of an arbitrary resource
    async fn apply(&self, obj: &DynamicObject) -> Result<(), kube::Error>;

    /// Fetch a resource, `None` if it does not exist
    async fn get(&self, id: &ResourceId) -> Result<Option<DynamicObject>, kube::Error>;

    /// Delete a resource; a resource that is already gone is not an error
    async fn delete(&self, id: &ResourceId) -> Result<(), kube::Error>;

    /// Fetch a live Deployment, `None` if it does not exist
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, kube::Error>;

    /// List every instance of a component kind across all namespaces
    async fn list_instances(&self, kind: ComponentKind) -> Result<Vec<InstanceSummary>, kube::Error>;

    /// Merge-patch the metadata of a component instance, returning the updated metadata
    async fn patch_metadata(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<ObjectMeta, kube::Error>;

    /// Merge-patch the status subresource of a component instance
    async fn patch_status(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error>;
}

/// [`ClusterClient`] backed by the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
    resources: DashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: DashMap::new(),
        }
    }

    /// Resolve a GVK through discovery, caching the result.
    ///
    /// Lookups are repeated for kinds not yet known, since CRDs applied
    /// earlier in the same pass only show up in discovery afterwards.
    async fn resolve(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(ApiResource, ApiCapabilities), kube::Error> {
        if let Some(found) = self.resources.get(gvk) {
            return Ok(found.value().clone());
        }
        let resolved = discovery::pinned_kind(&self.client, gvk).await?;
        debug!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            plural = %resolved.0.plural,
            "Discovered API resource"
        );
        self.resources.insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn dynamic_api(&self, id: &ResourceId) -> Result<Api<DynamicObject>, kube::Error> {
        let (resource, caps) = self.resolve(&id.gvk()).await?;
        let api = match (&caps.scope, id.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            (Scope::Namespaced, None) => {
                Api::default_namespaced_with(self.client.clone(), &resource)
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }

    fn component_api(&self, kind: ComponentKind, namespace: &str) -> Api<DynamicObject> {
        let resource = match kind {
            ComponentKind::Serving => ApiResource::erase::<KnativeServing>(&()),
            ComponentKind::Eventing => ApiResource::erase::<KnativeEventing>(&()),
        };
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, obj: &DynamicObject) -> Result<(), kube::Error> {
        let Some(id) = ResourceId::of(obj) else {
            return Err(kube::Error::SerdeError(serde::de::Error::custom(format!(
                "resource {:?} is missing apiVersion, kind or name",
                obj.metadata.name
            ))));
        };
        let api = self.dynamic_api(&id).await?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&id.name, &params, &Patch::Apply(obj)).await?;
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<DynamicObject>, kube::Error> {
        let api = self.dynamic_api(id).await?;
        api.get_opt(&id.name).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), kube::Error> {
        let api = self.dynamic_api(id).await?;
        match api.delete(&id.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(resource = %id, "Resource already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn list_instances(&self, kind: ComponentKind) -> Result<Vec<InstanceSummary>, kube::Error> {
        let params = ListParams::default();
        let instances = match kind {
            ComponentKind::Serving => Api::<KnativeServing>::all(self.client.clone())
                .list(&params)
                .await?
                .items
                .iter()
                .map(InstanceSummary::from_resource)
                .collect(),
            ComponentKind::Eventing => Api::<KnativeEventing>::all(self.client.clone())
                .list(&params)
                .await?
                .items
                .iter()
                .map(InstanceSummary::from_resource)
                .collect(),
        };
        Ok(instances)
    }

    async fn patch_metadata(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<ObjectMeta, kube::Error> {
        let updated = self
            .component_api(kind, namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;
        Ok(updated.metadata)
    }

    async fn patch_status(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error> {
        self.component_api(kind, namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}
