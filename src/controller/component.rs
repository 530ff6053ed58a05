//! The two component kinds as seen by the shared reconciliation engine

use std::fmt::Debug;

use kube::api::{ApiResource, DynamicObject};
use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;
use crate::crd::{CommonSpec, ComponentKind, ComponentStatus, KnativeEventing, KnativeServing};
use crate::transform::{
    AggregationRuleTransform, CustomCertsTransform, DefaultBrokerClassTransform, Extension,
    GatewayTransform, HighAvailabilityTransform, ObservedState, Pipeline, Transformer,
    common::common_transformers,
};

/// A custom resource describing one installation of a component
pub trait Component:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ComponentKind;

    fn common_spec(&self) -> &CommonSpec;

    fn status(&self) -> Option<&ComponentStatus>;

    fn status_mut(&mut self) -> &mut ComponentStatus;

    /// Transformers specific to this kind, run after the common ones
    fn transformers(&self, observed: &ObservedState) -> Result<Vec<Box<dyn Transformer>>>;

    /// Resources left behind by old releases, deleted on every pass
    fn legacy_resources(&self) -> Vec<DynamicObject> {
        Vec::new()
    }

    /// Full pipeline for this instance
    fn pipeline(&self, observed: &ObservedState, extension: &dyn Extension) -> Result<Pipeline> {
        let common = Pipeline::new(common_transformers(self, self.common_spec())?);
        let specific = Pipeline::new(self.transformers(observed)?);
        let extra = Pipeline::new(extension.transformers(Self::KIND, self.common_spec()));
        Ok(common.compose(specific).compose(extra))
    }
}

impl Component for KnativeServing {
    const KIND: ComponentKind = ComponentKind::Serving;

    fn common_spec(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut ComponentStatus {
        self.status.get_or_insert_with(ComponentStatus::default)
    }

    fn transformers(&self, observed: &ObservedState) -> Result<Vec<Box<dyn Transformer>>> {
        Ok(vec![
            Box::new(GatewayTransform::new(&self.spec)),
            Box::new(CustomCertsTransform::new(self.spec.controller_custom_certs.as_ref())),
            Box::new(HighAvailabilityTransform::new(
                Self::KIND,
                self.spec.common.high_availability.as_ref(),
            )),
            Box::new(AggregationRuleTransform::new(observed)),
        ])
    }

    fn legacy_resources(&self) -> Vec<DynamicObject> {
        let ns = self.namespace().unwrap_or_default();
        vec![
            // istio-system ingress from 0.3
            legacy("v1", "Service", "istio-system", "knative-ingressgateway"),
            legacy("apps/v1", "Deployment", "istio-system", "knative-ingressgateway"),
            legacy(
                "autoscaling/v1",
                "HorizontalPodAutoscaler",
                "istio-system",
                "knative-ingressgateway",
            ),
            // config-controller from 0.5
            legacy("v1", "ConfigMap", &ns, "config-controller"),
        ]
    }
}

fn legacy(api_version: &str, kind: &str, namespace: &str, name: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &ApiResource {
        group: String::new(),
        version: String::new(),
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: String::new(),
    });
    obj.metadata.namespace = Some(namespace.to_string());
    obj
}

impl Component for KnativeEventing {
    const KIND: ComponentKind = ComponentKind::Eventing;

    fn common_spec(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut ComponentStatus {
        self.status.get_or_insert_with(ComponentStatus::default)
    }

    fn transformers(&self, _observed: &ObservedState) -> Result<Vec<Box<dyn Transformer>>> {
        Ok(vec![
            Box::new(DefaultBrokerClassTransform::new(
                self.spec.default_broker_class.as_deref(),
            )),
            Box::new(HighAvailabilityTransform::new(
                Self::KIND,
                self.spec.common.high_availability.as_ref(),
            )),
        ])
    }
}
