//! Ordered, identity-deduplicated collections of Kubernetes resources
//!
//! A [`ManifestSet`] holds the untyped resources making up one release of a
//! component. Sets are never mutated in place: appending, filtering and
//! transforming all produce a new set, so a cached release can be shared
//! freely between reconciliations.

pub mod store;

use std::collections::HashSet;
use std::fmt;

use kube::api::{DynamicObject, GroupVersionKind};
use tracing::debug;

use crate::controller::client::ClusterClient;
use crate::controller::error::{Error, Result};

pub use store::ManifestStore;

/// Kinds whose objects grant permissions; removed last on uninstall
pub const RBAC_KINDS: &[&str] = &["Role", "ClusterRole", "RoleBinding", "ClusterRoleBinding"];

/// Identity of a resource: group/version/kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Identity of an object, or `None` if it lacks apiVersion, kind or name
    pub fn of(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let name = obj.metadata.name.as_ref()?;
        if types.kind.is_empty() || types.api_version.is_empty() {
            return None;
        }
        Some(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: obj.metadata.namespace.clone(),
            name: name.clone(),
        })
    }

    /// Split apiVersion into (group, version); the core group is ""
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self.group_version();
        GroupVersionKind::gvk(group, version, &self.kind)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{} ({})", self.kind, ns, self.name, self.api_version),
            None => write!(f, "{} {} ({})", self.kind, self.name, self.api_version),
        }
    }
}

/// Kind of an object, or "" when type information is missing
pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// Name of an object, or "" when unnamed
pub fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

#[derive(Clone, Debug)]
struct Entry {
    id: ResourceId,
    object: DynamicObject,
}

/// Ordered collection of resources with unique identities
#[derive(Clone, Debug, Default)]
pub struct ManifestSet {
    entries: Vec<Entry>,
}

impl ManifestSet {
    /// Build a set from objects, in order. A later object with the same
    /// identity replaces the earlier one in its original position.
    pub fn new(objects: impl IntoIterator<Item = DynamicObject>) -> Result<Self> {
        let mut set = ManifestSet::default();
        for object in objects {
            let id = ResourceId::of(&object).ok_or_else(|| {
                Error::InvalidManifest(format!(
                    "resource is missing apiVersion, kind or metadata.name: {:?}",
                    object.metadata.name
                ))
            })?;
            set.upsert(Entry { id, object });
        }
        Ok(set)
    }

    /// Build a set from raw JSON documents
    pub fn from_values(values: impl IntoIterator<Item = serde_json::Value>) -> Result<Self> {
        let objects = values
            .into_iter()
            .map(serde_json::from_value::<DynamicObject>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(objects)
    }

    fn upsert(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynamicObject> {
        self.entries.iter().map(|e| &e.object)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.entries.iter().map(|e| &e.id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.iter().any(|e| &e.id == id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&DynamicObject> {
        self.entries.iter().find(|e| &e.id == id).map(|e| &e.object)
    }

    pub fn into_objects(self) -> Vec<DynamicObject> {
        self.entries.into_iter().map(|e| e.object).collect()
    }

    /// Merge two sets. `other`'s copy wins on identity collision; appending
    /// an empty set yields an independent clone.
    pub fn append(&self, other: &ManifestSet) -> ManifestSet {
        let mut merged = self.clone();
        for entry in &other.entries {
            merged.upsert(entry.clone());
        }
        merged
    }

    /// Resources matching the predicate, in order
    pub fn filter<P>(&self, predicate: P) -> ManifestSet
    where
        P: Fn(&DynamicObject) -> bool,
    {
        ManifestSet {
            entries: self
                .entries
                .iter()
                .filter(|e| predicate(&e.object))
                .cloned()
                .collect(),
        }
    }

    /// Resources of this set whose identity is absent from `other`
    pub fn difference(&self, other: &ManifestSet) -> ManifestSet {
        self.filter(not(in_set(other)))
    }

    /// Apply every resource in order, stopping at the first failure
    pub async fn apply(&self, client: &dyn ClusterClient) -> Result<()> {
        for entry in &self.entries {
            client
                .apply(&entry.object)
                .await
                .map_err(|source| Error::Apply {
                    resource: entry.id.clone(),
                    source,
                })?;
            debug!(resource = %entry.id, "Applied resource");
        }
        Ok(())
    }

    /// Delete every resource in reverse order; resources already gone are fine
    pub async fn delete(&self, client: &dyn ClusterClient) -> Result<()> {
        for entry in self.entries.iter().rev() {
            client
                .delete(&entry.id)
                .await
                .map_err(|source| Error::Delete {
                    resource: entry.id.clone(),
                    source,
                })?;
            debug!(resource = %entry.id, "Deleted resource");
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ManifestSet {
    type Item = &'a DynamicObject;
    type IntoIter = Box<dyn Iterator<Item = &'a DynamicObject> + Send + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Matches objects of the given kind
pub fn by_kind(kind: impl Into<String>) -> impl Fn(&DynamicObject) -> bool {
    let kind = kind.into();
    move |obj| kind_of(obj) == kind
}

/// Matches objects of any of the given kinds
pub fn by_kinds(kinds: &'static [&'static str]) -> impl Fn(&DynamicObject) -> bool {
    move |obj| kinds.contains(&kind_of(obj))
}

/// Matches CustomResourceDefinitions
pub fn is_crd(obj: &DynamicObject) -> bool {
    kind_of(obj) == "CustomResourceDefinition"
}

/// Matches Roles, ClusterRoles and their bindings
pub fn is_rbac(obj: &DynamicObject) -> bool {
    RBAC_KINDS.contains(&kind_of(obj))
}

/// Matches objects whose identity is present in `set`
pub fn in_set(set: &ManifestSet) -> impl Fn(&DynamicObject) -> bool + use<> {
    let ids: HashSet<ResourceId> = set.ids().cloned().collect();
    move |obj| ResourceId::of(obj).is_some_and(|id| ids.contains(&id))
}

/// Negates a predicate
pub fn not<P>(predicate: P) -> impl Fn(&DynamicObject) -> bool
where
    P: Fn(&DynamicObject) -> bool,
{
    move |obj| !predicate(obj)
}
