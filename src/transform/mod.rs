//! Manifest transformation pipeline
//!
//! A release manifest is generic; transformers tailor every resource of it to
//! one component instance. Each transformer is built with everything it needs
//! (the instance spec, data observed from the cluster) and only ever touches
//! the single resource it is handed.
//!
//! The full pipeline for an instance is, in order:
//! 1. namespace and owner stamping, then ConfigMap overrides
//! 2. the per-kind transformers (see [`crate::controller::Component`])
//! 3. transformers contributed by the platform [`Extension`]

pub mod aggregation;
pub mod broker;
pub mod certs;
pub mod common;
pub mod gateway;
pub mod ha;

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::{Map, Value};

use crate::controller::error::{Error, Result};
use crate::crd::{ComponentKind, CommonSpec};
use crate::manifest::{ManifestSet, ResourceId, kind_of, name_of};

pub use aggregation::{AggregationRuleTransform, ObservedClusterRole, ObservedState};
pub use broker::DefaultBrokerClassTransform;
pub use certs::CustomCertsTransform;
pub use common::{CLUSTER_SCOPED_KINDS, ConfigMapTransform, NamespaceTransform, OwnerTransform};
pub use gateway::GatewayTransform;
pub use ha::HighAvailabilityTransform;

/// A single rewrite applied to every resource of a manifest.
///
/// Transformers leave resources they do not recognise untouched and fail only
/// when a resource they do recognise has an unexpected structure.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform(&self, obj: &mut DynamicObject) -> Result<()>;
}

/// Ordered list of transformers
#[derive(Default)]
pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Pipeline {
    pub fn new(transformers: Vec<Box<dyn Transformer>>) -> Self {
        Self { transformers }
    }

    /// Run `self` first, then `next`
    pub fn compose(mut self, next: Pipeline) -> Self {
        self.transformers.extend(next.transformers);
        self
    }

    pub fn push(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    /// Transform a copy of every resource of `manifest`.
    ///
    /// The first failure aborts the whole pass; no partial manifest is returned.
    pub fn apply(&self, manifest: &ManifestSet) -> Result<ManifestSet> {
        let mut transformed = Vec::with_capacity(manifest.len());
        for obj in manifest {
            let mut obj = obj.clone();
            self.transform_one(&mut obj)?;
            transformed.push(obj);
        }
        // Stamping may change identities, so rebuild rather than map in place
        ManifestSet::new(transformed)
    }

    fn transform_one(&self, obj: &mut DynamicObject) -> Result<()> {
        for transformer in &self.transformers {
            transformer.transform(obj)?;
        }
        Ok(())
    }
}

impl Transformer for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        self.transform_one(obj)
    }
}

/// Hook for platform-specific transformers, run after the per-kind ones
pub trait Extension: Send + Sync {
    fn transformers(&self, kind: ComponentKind, spec: &CommonSpec) -> Vec<Box<dyn Transformer>>;
}

/// Extension contributing nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExtension;

impl Extension for NoExtension {
    fn transformers(&self, _kind: ComponentKind, _spec: &CommonSpec) -> Vec<Box<dyn Transformer>> {
        Vec::new()
    }
}

/// Error constructor for transform failures on `obj`.
///
/// Holds no borrow of `obj`, so it can be used while the object is being edited.
pub(crate) fn failure(
    transformer: &'static str,
    obj: &DynamicObject,
) -> impl Fn(String) -> Error + use<> {
    let resource = ResourceId::of(obj)
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("{} {}", kind_of(obj), name_of(obj)));
    move |message| Error::Transform {
        transformer: transformer.to_string(),
        resource: resource.clone(),
        message,
    }
}

/// Group part of an object's apiVersion; "" for the core group
pub(crate) fn group_of(obj: &DynamicObject) -> &str {
    obj.types
        .as_ref()
        .and_then(|t| t.api_version.split_once('/'))
        .map(|(group, _)| group)
        .unwrap_or_default()
}

/// Walk `path` below `root`, creating empty objects where a key is missing
/// or null. Fails naming the first segment that holds something else.
pub(crate) fn object_at<'a>(
    root: &'a mut Value,
    path: &[&str],
) -> std::result::Result<&'a mut Map<String, Value>, String> {
    if root.is_null() {
        *root = Value::Object(Map::new());
    }
    let mut current = root;
    let mut walked = String::new();
    for segment in path {
        walked = if walked.is_empty() {
            (*segment).to_string()
        } else {
            format!("{walked}.{segment}")
        };
        let Value::Object(map) = current else {
            return Err(format!("expected an object above {walked}"));
        };
        let next = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if next.is_null() {
            *next = Value::Object(Map::new());
        }
        if !next.is_object() {
            return Err(format!("{walked} is not an object"));
        }
        current = next;
    }
    match current {
        Value::Object(map) => Ok(map),
        _ => Err("expected an object".to_string()),
    }
}

/// Array at `key` of `map`, created when missing or null
pub(crate) fn array_at<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
) -> std::result::Result<&'a mut Vec<Value>, String> {
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    match entry {
        Value::Array(items) => Ok(items),
        _ => Err(format!("{key} is not an array")),
    }
}

/// Convert string pairs into a JSON object
pub(crate) fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
