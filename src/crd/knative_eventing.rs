use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonSpec, ComponentStatus};

/// KnativeEventing is the Schema for the knativeeventings API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "operator.knative.dev",
    version = "v1alpha1",
    kind = "KnativeEventing",
    plural = "knativeeventings",
    shortname = "ke",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeEventingSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Broker class used when a Broker does not name one (e.g. "MTChannelBasedBroker")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_broker_class: Option<String>,
}
