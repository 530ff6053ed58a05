use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The two component kinds managed by the operator
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Serving,
    Eventing,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 2] = [ComponentKind::Serving, ComponentKind::Eventing];

    /// Kubernetes kind of the custom resource
    pub fn kind(&self) -> &'static str {
        match self {
            ComponentKind::Serving => "KnativeServing",
            ComponentKind::Eventing => "KnativeEventing",
        }
    }

    /// Plural resource name of the custom resource
    pub fn plural(&self) -> &'static str {
        match self {
            ComponentKind::Serving => "knativeservings",
            ComponentKind::Eventing => "knativeeventings",
        }
    }

    /// Directory holding this component's releases below the manifest root
    pub fn path_element(&self) -> &'static str {
        match self {
            ComponentKind::Serving => "knative-serving",
            ComponentKind::Eventing => "knative-eventing",
        }
    }

    /// Finalizer owned by the current operator
    pub fn finalizer(&self) -> String {
        format!("{}.{}", self.plural(), crate::crd::GROUP)
    }

    /// Finalizer written by older operator releases, migrated away on every pass
    pub fn deprecated_finalizer(&self) -> &'static str {
        match self {
            ComponentKind::Serving => "delete-knative-serving-manifest",
            ComponentKind::Eventing => "delete-knative-eventing-manifest",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Spec fields shared by every component kind
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    /// Version to install (e.g. "0.16.0"). Defaults to the newest bundled release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Replica overrides for leader-elected control plane components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_availability: Option<HighAvailability>,

    /// Extra ConfigMap data keyed by config name ("autoscaler" targets "config-autoscaler")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, BTreeMap<String, String>>,

    /// Additional resources installed alongside the release manifest.
    /// A resource with the same identity as a release resource replaces it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_manifests: Vec<serde_json::Value>,
}

/// High-availability configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HighAvailability {
    /// Replica count for every HA-capable component
    pub replicas: i32,
}

/// Observed state shared by every component kind
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Generation most recently acted on by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Version of the last release whose installation fully converged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Conditions describing installation health
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Manifest sources making up the installed release
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<String>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Condition types tracked for every component
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionType {
    InstallSucceeded,
    DeploymentsAvailable,
    DependenciesInstalled,
}

impl ConditionType {
    /// Conditions that must all be True for the component to be ready
    pub const TRACKED: [ConditionType; 3] = [
        ConditionType::DependenciesInstalled,
        ConditionType::DeploymentsAvailable,
        ConditionType::InstallSucceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::InstallSucceeded => "InstallSucceeded",
            ConditionType::DeploymentsAvailable => "DeploymentsAvailable",
            ConditionType::DependenciesInstalled => "DependenciesInstalled",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate condition derived from the tracked ones
pub const READY_CONDITION: &str = "Ready";

/// Tri-state condition value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Parse a condition status string; anything unrecognised is Unknown
    pub fn parse(value: &str) -> Self {
        match value {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
