use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSpec, ComponentStatus};

/// KnativeServing is the Schema for the knativeservings API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "operator.knative.dev",
    version = "v1alpha1",
    kind = "KnativeServing",
    plural = "knativeservings",
    shortname = "ks",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServingSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Ingress configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfigs>,

    /// Trust registries with self-signed certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_custom_certs: Option<CustomCerts>,

    /// Deprecated: use `ingress.istio.knativeIngressGateway`
    #[serde(
        default,
        rename = "knative-ingress-gateway",
        skip_serializing_if = "Option::is_none"
    )]
    pub deprecated_knative_ingress_gateway: Option<IstioGatewayOverride>,

    /// Deprecated: use `ingress.istio.clusterLocalGateway`
    #[serde(
        default,
        rename = "cluster-local-gateway",
        skip_serializing_if = "Option::is_none"
    )]
    pub deprecated_cluster_local_gateway: Option<IstioGatewayOverride>,
}

impl KnativeServingSpec {
    fn istio(&self) -> Option<&IstioIngressConfiguration> {
        self.ingress.as_ref().and_then(|i| i.istio.as_ref())
    }

    /// Selector override for the knative-ingress-gateway.
    /// The canonical location wins; the deprecated one is used when it is absent.
    pub fn ingress_gateway_override(&self) -> Option<&IstioGatewayOverride> {
        self.istio()
            .and_then(|istio| istio.knative_ingress_gateway.as_ref())
            .or(self.deprecated_knative_ingress_gateway.as_ref())
    }

    /// Selector override for the cluster-local-gateway
    pub fn local_gateway_override(&self) -> Option<&IstioGatewayOverride> {
        self.istio()
            .and_then(|istio| istio.cluster_local_gateway.as_ref())
            .or(self.deprecated_cluster_local_gateway.as_ref())
    }
}

/// Ingress configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfigs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<IstioIngressConfiguration>,
}

/// Istio ingress configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioIngressConfiguration {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knative_ingress_gateway: Option<IstioGatewayOverride>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_local_gateway: Option<IstioGatewayOverride>,
}

/// Override for one of the well-known Istio gateways
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioGatewayOverride {
    /// Replaces the gateway's `spec.selector`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

/// Reference to a ConfigMap or Secret holding CA certificates
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomCerts {
    /// One of "ConfigMap" or "Secret"
    #[serde(rename = "type")]
    pub type_: String,

    /// Name of the ConfigMap or Secret
    pub name: String,
}
