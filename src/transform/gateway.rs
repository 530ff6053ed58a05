//! Istio gateway selector overrides

use std::collections::BTreeMap;

use kube::api::DynamicObject;

use super::{Transformer, failure, group_of, object_at, string_map};
use crate::controller::error::Result;
use crate::crd::{IstioGatewayOverride, KnativeServingSpec};
use crate::manifest::{kind_of, name_of};

pub const INGRESS_GATEWAY: &str = "knative-ingress-gateway";
pub const LOCAL_GATEWAY: &str = "cluster-local-gateway";

const ISTIO_NETWORKING_GROUP: &str = "networking.istio.io";

/// Replaces the pod selector of the two well-known gateways.
///
/// The configured selector replaces the manifest's wholesale. An absent or
/// empty selector leaves the gateway as shipped.
pub struct GatewayTransform {
    ingress: Option<BTreeMap<String, String>>,
    local: Option<BTreeMap<String, String>>,
}

impl GatewayTransform {
    pub fn new(spec: &KnativeServingSpec) -> Self {
        let selector = |o: Option<&IstioGatewayOverride>| {
            o.map(|o| o.selector.clone()).filter(|s| !s.is_empty())
        };
        Self {
            ingress: selector(spec.ingress_gateway_override()),
            local: selector(spec.local_gateway_override()),
        }
    }
}

impl Transformer for GatewayTransform {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        if kind_of(obj) != "Gateway" || group_of(obj) != ISTIO_NETWORKING_GROUP {
            return Ok(());
        }
        let selector = match name_of(obj) {
            INGRESS_GATEWAY => self.ingress.as_ref(),
            LOCAL_GATEWAY => self.local.as_ref(),
            _ => None,
        };
        let Some(selector) = selector else {
            return Ok(());
        };

        let fail = failure(self.name(), obj);
        let spec = object_at(&mut obj.data, &["spec"]).map_err(&fail)?;
        spec.insert("selector".to_string(), string_map(selector));
        Ok(())
    }
}
