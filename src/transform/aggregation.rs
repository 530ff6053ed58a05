//! Aggregated ClusterRoles
//!
//! The controller manager fills in the `rules` of aggregated ClusterRoles and
//! other installers may add `clusterRoleSelectors` out of band. Applying the
//! shipped ClusterRole as-is would wipe both, so the live values are merged
//! into the manifest copy before it is applied.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::Value;
use tracing::debug;

use super::{Transformer, array_at, failure, object_at};
use crate::controller::client::ClusterClient;
use crate::controller::error::Result;
use crate::manifest::{ManifestSet, ResourceId, kind_of, name_of};

/// Live state of one aggregated ClusterRole
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedClusterRole {
    pub selectors: Vec<Value>,
    pub rules: Option<Value>,
}

/// Cluster data read before the pipeline runs, keyed by resource name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedState {
    pub cluster_roles: BTreeMap<String, ObservedClusterRole>,
}

impl ObservedState {
    /// Read the live copy of every aggregated ClusterRole in `manifest`
    pub async fn observe(manifest: &ManifestSet, client: &dyn ClusterClient) -> Result<Self> {
        let mut observed = ObservedState::default();
        for obj in manifest.iter().filter(|o| is_aggregated_cluster_role(o)) {
            let Some(id) = ResourceId::of(obj) else {
                continue;
            };
            let Some(live) = client.get(&id).await? else {
                continue;
            };
            let selectors = live
                .data
                .pointer("/aggregationRule/clusterRoleSelectors")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let rules = live.data.get("rules").filter(|r| !r.is_null()).cloned();
            debug!(name = %id.name, selectors = selectors.len(), "Observed aggregated ClusterRole");
            observed
                .cluster_roles
                .insert(id.name, ObservedClusterRole { selectors, rules });
        }
        Ok(observed)
    }
}

fn is_aggregated_cluster_role(obj: &DynamicObject) -> bool {
    kind_of(obj) == "ClusterRole"
        && obj
            .data
            .get("aggregationRule")
            .is_some_and(|rule| !rule.is_null())
}

/// Keeps live selectors and rules of aggregated ClusterRoles
pub struct AggregationRuleTransform {
    observed: BTreeMap<String, ObservedClusterRole>,
}

impl AggregationRuleTransform {
    pub fn new(observed: &ObservedState) -> Self {
        Self {
            observed: observed.cluster_roles.clone(),
        }
    }
}

impl Transformer for AggregationRuleTransform {
    fn name(&self) -> &'static str {
        "aggregation-rule"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        if !is_aggregated_cluster_role(obj) {
            return Ok(());
        }
        let Some(live) = self.observed.get(name_of(obj)) else {
            return Ok(());
        };
        let fail = failure(self.name(), obj);

        let rule = object_at(&mut obj.data, &["aggregationRule"]).map_err(&fail)?;
        let shipped = std::mem::take(array_at(rule, "clusterRoleSelectors").map_err(&fail)?);
        let mut merged = live.selectors.clone();
        for selector in shipped {
            if !merged.contains(&selector) {
                merged.push(selector);
            }
        }
        rule.insert("clusterRoleSelectors".to_string(), Value::Array(merged));

        if let (Some(rules), Value::Object(root)) = (&live.rules, &mut obj.data) {
            root.insert("rules".to_string(), rules.clone());
        }
        Ok(())
    }
}
