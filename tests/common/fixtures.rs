//! Builders for component instances and on-disk release layouts
//!
//! ```rust,ignore
//! let kodata = ManifestDir::new()
//!     .release(ComponentKind::Serving, "0.16.0", SERVING_0_16);
//! let instance = serving("knative-serving", "knative-serving").with_version("0.16.0");
//! ```

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use serde_json::Value;
use tempfile::TempDir;

use knative_operator::crd::{
    ComponentKind, ComponentStatus, HighAvailability, KnativeEventing, KnativeEventingSpec,
    KnativeServing, KnativeServingSpec,
};
use knative_operator::manifest::ManifestStore;

pub const SERVING_NAMESPACE: &str = "knative-serving";

/// Serving release with a CRD, RBAC, config, a scaled controller and the activator HPA
pub const SERVING_0_15: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: services.serving.knative.dev
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: knative-serving-admin
rules: []
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: knative-serving-controller-admin
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: knative-serving-admin
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: controller
  namespace: placeholder
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-leader-election
  namespace: placeholder
data:
  leaseDuration: 15s
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-autoscaler
  namespace: placeholder
data:
  container-concurrency-target-default: "100"
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller
  namespace: placeholder
spec:
  replicas: 1
---
apiVersion: autoscaling/v2
kind: HorizontalPodAutoscaler
metadata:
  name: activator
  namespace: placeholder
spec:
  minReplicas: 1
  maxReplicas: 20
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: networking-certmanager
  namespace: placeholder
spec:
  replicas: 1
"#;

/// Same as [`SERVING_0_15`] without networking-certmanager, plus a webhook and
/// an aggregated ClusterRole
pub const SERVING_0_16: &str = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: addressable-resolver
aggregationRule:
  clusterRoleSelectors:
  - matchLabels:
      duck.knative.dev/addressable: "true"
rules: []
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: services.serving.knative.dev
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: knative-serving-admin
rules: []
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: knative-serving-controller-admin
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: knative-serving-admin
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: controller
  namespace: placeholder
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-leader-election
  namespace: placeholder
data:
  leaseDuration: 15s
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-autoscaler
  namespace: placeholder
data:
  container-concurrency-target-default: "100"
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller
  namespace: placeholder
spec:
  replicas: 1
---
apiVersion: autoscaling/v2
kind: HorizontalPodAutoscaler
metadata:
  name: activator
  namespace: placeholder
spec:
  minReplicas: 1
  maxReplicas: 20
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: webhook
  namespace: placeholder
spec:
  replicas: 1
"#;

pub const EVENTING_0_16: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-br-defaults
  namespace: placeholder
data:
  default-br-config: |
    clusterDefault:
      brokerClass: MTChannelBasedBroker
      apiVersion: v1
      kind: ConfigMap
      name: config-br-default-channel
      namespace: knative-eventing
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: eventing-controller
  namespace: placeholder
spec:
  replicas: 1
"#;

/// Release tree under a temporary `KO_DATA_PATH`
pub struct ManifestDir {
    dir: TempDir,
}

impl ManifestDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Write `content` as the single manifest file of a release
    pub fn release(self, kind: ComponentKind, version: &str, content: &str) -> Self {
        self.file(kind, version, "release.yaml", content)
    }

    pub fn file(self, kind: ComponentKind, version: &str, file: &str, content: &str) -> Self {
        let path = self.dir.path().join(kind.path_element()).join(version);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(file), content).unwrap();
        self
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn store(&self) -> Arc<ManifestStore> {
        Arc::new(ManifestStore::new(self.dir.path()))
    }
}

impl Default for ManifestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Untyped object from JSON
pub fn object(value: Value) -> DynamicObject {
    serde_json::from_value(value).unwrap()
}

pub fn serving(name: &str, namespace: &str) -> KnativeServing {
    let mut ks = KnativeServing::new(name, KnativeServingSpec::default());
    ks.metadata.namespace = Some(namespace.to_string());
    ks.metadata.uid = Some(format!("{namespace}-{name}-uid"));
    ks.metadata.generation = Some(1);
    ks.metadata.resource_version = Some("41".to_string());
    ks
}

pub fn eventing(name: &str, namespace: &str) -> KnativeEventing {
    let mut ke = KnativeEventing::new(name, KnativeEventingSpec::default());
    ke.metadata.namespace = Some(namespace.to_string());
    ke.metadata.uid = Some(format!("{namespace}-{name}-uid"));
    ke.metadata.generation = Some(1);
    ke.metadata.resource_version = Some("41".to_string());
    ke
}

/// Builder-style tweaks shared by both kinds
pub trait InstanceExt: Sized {
    fn metadata_mut(&mut self) -> &mut kube::api::ObjectMeta;
    fn status_slot(&mut self) -> &mut Option<ComponentStatus>;
    fn spec_version(&mut self) -> &mut Option<String>;
    fn ha_slot(&mut self) -> &mut Option<HighAvailability>;

    fn with_version(mut self, version: &str) -> Self {
        *self.spec_version() = Some(version.to_string());
        self
    }

    fn with_ha(mut self, replicas: i32) -> Self {
        *self.ha_slot() = Some(HighAvailability { replicas });
        self
    }

    fn with_status(mut self, status: ComponentStatus) -> Self {
        *self.status_slot() = Some(status);
        self
    }

    fn with_finalizers(mut self, finalizers: &[&str]) -> Self {
        self.metadata_mut().finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        self
    }

    fn deleting(mut self) -> Self {
        self.metadata_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        self
    }
}

impl InstanceExt for KnativeServing {
    fn metadata_mut(&mut self) -> &mut kube::api::ObjectMeta {
        &mut self.metadata
    }
    fn status_slot(&mut self) -> &mut Option<ComponentStatus> {
        &mut self.status
    }
    fn spec_version(&mut self) -> &mut Option<String> {
        &mut self.spec.common.version
    }
    fn ha_slot(&mut self) -> &mut Option<HighAvailability> {
        &mut self.spec.common.high_availability
    }
}

impl InstanceExt for KnativeEventing {
    fn metadata_mut(&mut self) -> &mut kube::api::ObjectMeta {
        &mut self.metadata
    }
    fn status_slot(&mut self) -> &mut Option<ComponentStatus> {
        &mut self.status
    }
    fn spec_version(&mut self) -> &mut Option<String> {
        &mut self.spec.common.version
    }
    fn ha_slot(&mut self) -> &mut Option<HighAvailability> {
        &mut self.spec.common.high_availability
    }
}
