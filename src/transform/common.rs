//! Transformers applied to every component kind

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::api::DynamicObject;
use serde_json::Value;

use super::{Transformer, failure, object_at};
use crate::controller::error::{Error, Result};
use crate::crd::CommonSpec;
use crate::manifest::{kind_of, name_of};

/// Kinds that live outside any namespace and are never stamped
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "PriorityClass",
    "StorageClass",
    "PersistentVolume",
];

fn is_cluster_scoped(obj: &DynamicObject) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind_of(obj))
}

/// Moves namespaced resources into the instance namespace
pub struct NamespaceTransform {
    namespace: String,
}

impl NamespaceTransform {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl Transformer for NamespaceTransform {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        if !is_cluster_scoped(obj) {
            obj.metadata.namespace = Some(self.namespace.clone());
        }
        Ok(())
    }
}

/// Makes the instance the controlling owner of namespaced resources
pub struct OwnerTransform {
    owner: OwnerReference,
}

impl OwnerTransform {
    pub fn new(owner: OwnerReference) -> Self {
        Self { owner }
    }

    /// Owner reference pointing at `instance`
    pub fn for_instance<K>(instance: &K) -> Result<Self>
    where
        K: Resource<DynamicType = ()>,
    {
        let owner = instance
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey("metadata.uid"))?;
        Ok(Self::new(owner))
    }
}

impl Transformer for OwnerTransform {
    fn name(&self) -> &'static str {
        "owner"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        if is_cluster_scoped(obj) {
            return Ok(());
        }
        let owners = obj.metadata.owner_references.get_or_insert_with(Vec::new);
        owners.retain(|o| o.uid != self.owner.uid);
        owners.push(self.owner.clone());
        Ok(())
    }
}

/// Merges `spec.config` entries into the matching ConfigMaps.
///
/// The entry `autoscaler` targets `config-autoscaler`; an entry already
/// carrying the prefix targets the ConfigMap of that exact name.
pub struct ConfigMapTransform {
    overrides: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigMapTransform {
    pub fn new(config: &BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let overrides = config
            .iter()
            .map(|(key, data)| {
                let name = if key.starts_with("config-") {
                    key.clone()
                } else {
                    format!("config-{key}")
                };
                (name, data.clone())
            })
            .collect();
        Self { overrides }
    }
}

impl Transformer for ConfigMapTransform {
    fn name(&self) -> &'static str {
        "config-map"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        if kind_of(obj) != "ConfigMap" {
            return Ok(());
        }
        let Some(overrides) = self.overrides.get(name_of(obj)) else {
            return Ok(());
        };

        let fail = failure(self.name(), obj);
        let data = object_at(&mut obj.data, &["data"]).map_err(&fail)?;
        for (key, value) in overrides {
            data.insert(key.clone(), Value::String(value.clone()));
        }
        Ok(())
    }
}

/// Transformers every instance gets first, in order
pub fn common_transformers<K>(instance: &K, spec: &CommonSpec) -> Result<Vec<Box<dyn Transformer>>>
where
    K: Resource<DynamicType = ()>,
{
    let namespace = instance
        .meta()
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;

    let mut transformers: Vec<Box<dyn Transformer>> = vec![
        Box::new(NamespaceTransform::new(namespace)),
        Box::new(OwnerTransform::for_instance(instance)?),
    ];
    if !spec.config.is_empty() {
        transformers.push(Box::new(ConfigMapTransform::new(&spec.config)));
    }
    Ok(transformers)
}
