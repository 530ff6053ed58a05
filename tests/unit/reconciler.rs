//! Unit tests for full reconcile passes against an in-memory cluster

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use serde_json::json;

use knative_operator::Context;
use knative_operator::controller::reconciler::{NOT_READY_REQUEUE, READY_REQUEUE};
use knative_operator::controller::{Error, reconcile};
use knative_operator::crd::{ComponentKind, ConditionStatus, ConditionType};
use knative_operator::manifest::ResourceId;
use knative_operator::transform::ha::leader_elected_components;

use crate::common::*;

fn context(cluster: &Arc<FakeCluster>, kodata: &ManifestDir) -> Arc<Context> {
    Arc::new(Context::new(cluster.clone(), kodata.store()))
}

fn releases() -> ManifestDir {
    ManifestDir::new()
        .release(ComponentKind::Serving, "0.15.0", SERVING_0_15)
        .release(ComponentKind::Serving, "0.16.0", SERVING_0_16)
        .release(ComponentKind::Eventing, "0.16.0", EVENTING_0_16)
}

fn id(api_version: &str, kind: &str, name: &str) -> ResourceId {
    ResourceId::new(api_version, kind, Some(SERVING_NAMESPACE), name)
}

#[tokio::test]
async fn test_install_configures_and_becomes_ready() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let mut instance = serving("knative-serving", SERVING_NAMESPACE)
        .with_version("0.16.0")
        .with_ha(2);
    instance.spec.common.config = BTreeMap::from([(
        "autoscaler".to_string(),
        BTreeMap::from([("enable-scale-to-zero".to_string(), "false".to_string())]),
    )]);

    let action = reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(READY_REQUEUE));

    // The finalizer is added before anything is installed
    let ops = cluster.ops();
    assert!(matches!(&ops[0], Op::PatchMetadata { patch, .. }
        if patch["metadata"]["finalizers"] == json!(["knativeservings.operator.knative.dev"])));

    let controller = cluster.object(&id("apps/v1", "Deployment", "controller")).unwrap();
    assert_eq!(controller.data["spec"]["replicas"], 2);
    let webhook = cluster.object(&id("apps/v1", "Deployment", "webhook")).unwrap();
    assert_eq!(webhook.data["spec"]["replicas"], 1);

    let hpa = cluster
        .object(&id("autoscaling/v2", "HorizontalPodAutoscaler", "activator"))
        .unwrap();
    assert_eq!(hpa.data["spec"]["minReplicas"], 2);

    let leader_election = cluster
        .object(&id("v1", "ConfigMap", "config-leader-election"))
        .unwrap();
    assert_eq!(
        leader_election.data["data"]["enabledComponents"],
        leader_elected_components(ComponentKind::Serving)
    );
    let autoscaler = cluster.object(&id("v1", "ConfigMap", "config-autoscaler")).unwrap();
    assert_eq!(autoscaler.data["data"]["enable-scale-to-zero"], "false");

    // Cluster-scoped resources stay outside the namespace
    let crd = ResourceId::new(
        "apiextensions.k8s.io/v1",
        "CustomResourceDefinition",
        None,
        "services.serving.knative.dev",
    );
    assert!(cluster.object(&crd).is_some());

    let status = cluster.last_status().unwrap();
    assert!(status.is_ready());
    assert_eq!(status.version.as_deref(), Some("0.16.0"));
    assert_eq!(status.manifests, vec!["knative-serving/0.16.0"]);
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn test_unavailable_deployments_hold_version() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::default());
    let instance = serving("knative-serving", SERVING_NAMESPACE).with_version("0.16.0");

    let action = reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(NOT_READY_REQUEUE));

    let status = cluster.last_status().unwrap();
    assert!(!status.is_ready());
    assert_eq!(status.version, None);
    assert_eq!(
        status.condition_status(ConditionType::InstallSucceeded),
        ConditionStatus::True
    );
    assert_eq!(
        status.condition_status(ConditionType::DeploymentsAvailable),
        ConditionStatus::False
    );
    // Resources are applied even while waiting
    assert!(cluster.applied().contains(&id("apps/v1", "Deployment", "webhook")));
}

#[tokio::test]
async fn test_upgrade_prunes_resources_dropped_by_target() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let ctx = context(&cluster, &kodata);

    let first = serving("knative-serving", SERVING_NAMESPACE).with_version("0.15.0");
    reconcile(Arc::new(first), ctx.clone()).await.unwrap();
    let installed = cluster.last_status().unwrap();
    assert_eq!(installed.version.as_deref(), Some("0.15.0"));
    assert!(cluster.object(&id("apps/v1", "Deployment", "networking-certmanager")).is_some());

    cluster.clear_ops();
    let upgrade = serving("knative-serving", SERVING_NAMESPACE)
        .with_version("0.16.0")
        .with_finalizers(&["knativeservings.operator.knative.dev"])
        .with_status(installed);
    reconcile(Arc::new(upgrade), ctx).await.unwrap();

    let deleted = cluster.deleted();
    assert!(deleted.contains(&id("apps/v1", "Deployment", "networking-certmanager")));
    assert!(!deleted.contains(&id("apps/v1", "Deployment", "controller")));
    assert!(cluster.object(&id("apps/v1", "Deployment", "networking-certmanager")).is_none());

    let status = cluster.last_status().unwrap();
    assert_eq!(status.version.as_deref(), Some("0.16.0"));
    assert_eq!(status.manifests, vec!["knative-serving/0.16.0"]);
}

#[tokio::test]
async fn test_same_version_prunes_only_legacy_resources() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let ctx = context(&cluster, &kodata);

    let first = serving("knative-serving", SERVING_NAMESPACE).with_version("0.16.0");
    reconcile(Arc::new(first), ctx.clone()).await.unwrap();
    let installed = cluster.last_status().unwrap();

    cluster.clear_ops();
    let again = serving("knative-serving", SERVING_NAMESPACE)
        .with_version("0.16.0")
        .with_finalizers(&["knativeservings.operator.knative.dev"])
        .with_status(installed);
    reconcile(Arc::new(again), ctx).await.unwrap();

    let deleted = cluster.deleted();
    assert_eq!(deleted.len(), 4);
    assert!(deleted.contains(&id("v1", "ConfigMap", "config-controller")));
    assert!(deleted.contains(&ResourceId::new(
        "apps/v1",
        "Deployment",
        Some("istio-system"),
        "knative-ingressgateway"
    )));
    // Unchanged status is not written again
    assert!(cluster.last_status().is_none());
}

#[tokio::test]
async fn test_legacy_cleanup_keeps_resources_the_target_ships() {
    let kodata = ManifestDir::new().release(
        ComponentKind::Serving,
        "0.16.0",
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: config-controller\n  namespace: placeholder\n",
    );
    let cluster = Arc::new(FakeCluster::ready());
    let instance = serving("knative-serving", SERVING_NAMESPACE).with_version("0.16.0");

    reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap();

    let config = id("v1", "ConfigMap", "config-controller");
    assert!(cluster.applied().contains(&config));
    let deleted = cluster.deleted();
    assert!(!deleted.contains(&config), "{deleted:?}");
    // The istio-system leftovers are still removed
    assert_eq!(deleted.len(), 3);

    // Without HA the empty ConfigMap is installed exactly as shipped
    let live = cluster.object(&config).unwrap();
    let release = kodata.store().resolve(ComponentKind::Serving, "0.16.0").unwrap();
    let shipped = release.iter().next().unwrap();
    assert_eq!(live.data, shipped.data);
    assert!(live.data.get("data").is_none());
}

#[tokio::test]
async fn test_missing_version_installs_latest() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let instance = serving("knative-serving", SERVING_NAMESPACE);

    reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap();
    let status = cluster.last_status().unwrap();
    assert_eq!(status.version.as_deref(), Some("0.16.0"));
}

#[tokio::test]
async fn test_apply_failure_is_reported_in_status() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    cluster.fail_apply_of("HorizontalPodAutoscaler");
    let instance = serving("knative-serving", SERVING_NAMESPACE).with_version("0.16.0");

    let err = reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Stage { .. }));
    // A rejected object will not apply on retry either
    assert!(!err.is_retryable());

    let status = cluster.last_status().unwrap();
    let install = status.get_condition(ConditionType::InstallSucceeded).unwrap();
    assert_eq!(install.status, "False");
    assert!(install.message.starts_with("Install failed with message:"));
    assert!(!status.is_ready());
    assert_eq!(status.version, None);
}

#[tokio::test]
async fn test_unknown_version_fails_install() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let instance = serving("knative-serving", SERVING_NAMESPACE).with_version("0.99.0");

    let err = reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), Error::ManifestNotFound { .. }));
    assert!(cluster.applied().is_empty());

    let status = cluster.last_status().unwrap();
    assert_eq!(
        status.condition_status(ConditionType::InstallSucceeded),
        ConditionStatus::False
    );
}

#[tokio::test]
async fn test_version_outside_component_fails_install() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let instance =
        serving("knative-serving", SERVING_NAMESPACE).with_version("../knative-eventing/0.16.0");

    let err = reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), Error::InvalidVersion { .. }));
    assert!(!err.is_retryable());
    assert!(cluster.applied().is_empty());

    let status = cluster.last_status().unwrap();
    assert_eq!(
        status.condition_status(ConditionType::InstallSucceeded),
        ConditionStatus::False
    );
}

#[tokio::test]
async fn test_deprecated_finalizer_is_migrated() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let instance = serving("knative-serving", SERVING_NAMESPACE)
        .with_version("0.16.0")
        .with_finalizers(&["delete-knative-serving-manifest"]);

    reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap();

    let patches = cluster.metadata_patches();
    assert_eq!(patches.len(), 2);
    assert_eq!(
        patches[0]["metadata"]["finalizers"],
        json!(["delete-knative-serving-manifest", "knativeservings.operator.knative.dev"])
    );
    assert_eq!(
        patches[1]["metadata"]["finalizers"],
        json!(["knativeservings.operator.knative.dev"])
    );
    // The second patch is guarded by the version returned from the first
    assert_eq!(patches[0]["metadata"]["resourceVersion"], "41");
    assert_eq!(patches[1]["metadata"]["resourceVersion"], "1");
}

#[tokio::test]
async fn test_eventing_install_sets_broker_class() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let mut instance = eventing("knative-eventing", "knative-eventing").with_version("0.16.0");
    instance.spec.default_broker_class = Some("Kafka".to_string());

    let action = reconcile(Arc::new(instance), context(&cluster, &kodata))
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(READY_REQUEUE));

    let config = cluster
        .object(&ResourceId::new(
            "v1",
            "ConfigMap",
            Some("knative-eventing"),
            "config-br-defaults",
        ))
        .unwrap();
    let rendered = config.data["data"]["default-br-config"].as_str().unwrap();
    assert!(rendered.contains("brokerClass: Kafka"));

    let status = cluster.last_status().unwrap();
    assert_eq!(status.manifests, vec!["knative-eventing/0.16.0"]);
}

#[tokio::test]
async fn test_cancelled_pass_writes_no_status() {
    let kodata = releases();
    let cluster = Arc::new(FakeCluster::ready());
    let shutdown = tokio_util::sync::CancellationToken::new();
    shutdown.cancel();
    let ctx = Arc::new(
        Context::new(cluster.clone(), kodata.store())
            .with_shutdown(shutdown)
            .with_reconcile_timeout(Duration::from_secs(30)),
    );
    let instance = serving("knative-serving", SERVING_NAMESPACE).with_version("0.16.0");

    let err = reconcile(Arc::new(instance), ctx).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(cluster.last_status().is_none());
    assert!(cluster.applied().is_empty());
}
