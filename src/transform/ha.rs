//! High-availability replica overrides

use kube::api::DynamicObject;
use serde_json::Value;

use super::{Transformer, failure, object_at};
use crate::controller::error::Result;
use crate::crd::{ComponentKind, HighAvailability};
use crate::manifest::{kind_of, name_of};

/// ConfigMap listing the components that run leader election
pub const LEADER_ELECTION_CONFIG: &str = "config-leader-election";

/// Key of [`LEADER_ELECTION_CONFIG`] holding the component list
pub const ENABLED_COMPONENTS_KEY: &str = "enabledComponents";

/// HPA whose replica floor follows the HA replica count
const ACTIVATOR_HPA: &str = "activator";

const SERVING_HA_DEPLOYMENTS: &[&str] = &[
    "controller",
    "autoscaler-hpa",
    "networking-certmanager",
    "networking-ns-cert",
    "networking-istio",
];

const EVENTING_HA_DEPLOYMENTS: &[&str] = &[
    "eventing-controller",
    "sugar-controller",
    "imc-controller",
    "imc-dispatcher",
    "mt-broker-controller",
];

/// Workloads scaled by the HA replica count
pub fn ha_deployments(kind: ComponentKind) -> &'static [&'static str] {
    match kind {
        ComponentKind::Serving => SERVING_HA_DEPLOYMENTS,
        ComponentKind::Eventing => EVENTING_HA_DEPLOYMENTS,
    }
}

/// Value written to `enabledComponents`
pub fn leader_elected_components(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Serving => {
            "controller,hpaautoscaler,certcontroller,istiocontroller,nscontroller"
        }
        ComponentKind::Eventing => {
            "eventing-controller,sugar-controller,imc-controller,imc-dispatcher,mt-broker-controller"
        }
    }
}

/// Scales leader-elected components to the configured replica count
pub struct HighAvailabilityTransform {
    kind: ComponentKind,
    replicas: Option<i32>,
}

impl HighAvailabilityTransform {
    pub fn new(kind: ComponentKind, ha: Option<&HighAvailability>) -> Self {
        Self {
            kind,
            replicas: ha.map(|ha| ha.replicas),
        }
    }
}

impl Transformer for HighAvailabilityTransform {
    fn name(&self) -> &'static str {
        "high-availability"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        let Some(replicas) = self.replicas else {
            return Ok(());
        };
        let fail = failure(self.name(), obj);
        let (kind, name) = (kind_of(obj).to_string(), name_of(obj).to_string());

        match (kind.as_str(), name.as_str()) {
            ("ConfigMap", LEADER_ELECTION_CONFIG) => {
                let data = object_at(&mut obj.data, &["data"]).map_err(&fail)?;
                data.insert(
                    ENABLED_COMPONENTS_KEY.to_string(),
                    Value::String(leader_elected_components(self.kind).to_string()),
                );
            }
            ("Deployment" | "StatefulSet", name) if ha_deployments(self.kind).contains(&name) => {
                let spec = object_at(&mut obj.data, &["spec"]).map_err(&fail)?;
                spec.insert("replicas".to_string(), Value::from(replicas));
            }
            ("HorizontalPodAutoscaler", ACTIVATOR_HPA) => {
                let spec = object_at(&mut obj.data, &["spec"]).map_err(&fail)?;
                let current = match spec.get("minReplicas") {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(value.as_i64().ok_or_else(|| {
                        fail("spec.minReplicas is not an integer".to_string())
                    })?),
                };
                let floor = current.map_or(i64::from(replicas), |c| c.max(i64::from(replicas)));
                spec.insert("minReplicas".to_string(), Value::from(floor));
            }
            _ => {}
        }
        Ok(())
    }
}
