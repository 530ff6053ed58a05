//! Unit tests for release manifests and manifest sets

use std::sync::Arc;

use serde_json::json;

use knative_operator::Error;
use knative_operator::crd::ComponentKind;
use knative_operator::manifest::store::{compare_versions, parse_documents};
use knative_operator::manifest::{ManifestSet, ResourceId, by_kind, is_crd, is_rbac, not};

use crate::common::*;

fn config_map(name: &str, value: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": "knative-serving"},
        "data": {"key": value}
    })
}

#[test]
fn test_resolve_reads_files_in_name_order() {
    let kodata = ManifestDir::new()
        .file(
            ComponentKind::Serving,
            "0.16.0",
            "2-core.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: second\n",
        )
        .file(
            ComponentKind::Serving,
            "0.16.0",
            "1-crds.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: first\n---\n",
        )
        .file(ComponentKind::Serving, "0.16.0", "README.md", "not a manifest");

    let manifest = kodata.store().resolve(ComponentKind::Serving, "0.16.0").unwrap();
    let names: Vec<_> = manifest.ids().map(|id| id.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn test_resolve_is_cached() {
    let kodata = ManifestDir::new().release(ComponentKind::Serving, "0.16.0", SERVING_0_16);
    let store = kodata.store();

    assert!(!store.is_cached(ComponentKind::Serving, "0.16.0"));
    let first = store.resolve(ComponentKind::Serving, "0.16.0").unwrap();
    assert!(store.is_cached(ComponentKind::Serving, "0.16.0"));

    // Later changes on disk are not picked up for a published release
    std::fs::remove_dir_all(kodata.path().join("knative-serving")).unwrap();
    let second = store.resolve(ComponentKind::Serving, "0.16.0").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_resolve_unknown_version() {
    let kodata = ManifestDir::new().release(ComponentKind::Serving, "0.16.0", SERVING_0_16);
    let err = kodata
        .store()
        .resolve(ComponentKind::Serving, "0.99.0")
        .unwrap_err();
    assert!(matches!(err, Error::ManifestNotFound { ref version, .. } if version == "0.99.0"));
}

#[test]
fn test_resolve_rejects_paths_outside_component() {
    let kodata = ManifestDir::new()
        .release(ComponentKind::Serving, "0.16.0", SERVING_0_16)
        .release(ComponentKind::Eventing, "0.16.0", EVENTING_0_16);
    let store = kodata.store();

    for version in ["../knative-eventing/0.16.0", "0.16.0/../0.16.0", "/0.16.0", "..", ".", ""] {
        let err = store.resolve(ComponentKind::Serving, version).unwrap_err();
        assert!(
            matches!(err, Error::InvalidVersion { .. }),
            "{version:?} resolved to {err}"
        );
        assert!(!err.is_retryable());
    }
    assert!(store.resolve(ComponentKind::Serving, "0.16.0").is_ok());
}

#[test]
fn test_resolve_empty_release() {
    let kodata = ManifestDir::new().release(ComponentKind::Eventing, "0.16.0", "---\n");
    let err = kodata
        .store()
        .resolve(ComponentKind::Eventing, "0.16.0")
        .unwrap_err();
    assert!(matches!(err, Error::EmptyManifest { .. }));
}

#[test]
fn test_latest_version_uses_semantic_order() {
    let kodata = ManifestDir::new()
        .release(ComponentKind::Serving, "0.9.0", SERVING_0_15)
        .release(ComponentKind::Serving, "0.16.0", SERVING_0_16)
        .release(ComponentKind::Serving, "0.15.1", SERVING_0_15);
    let store = kodata.store();

    assert_eq!(
        store.list_available_versions(ComponentKind::Serving).unwrap(),
        vec!["0.16.0", "0.15.1", "0.9.0"]
    );
    assert_eq!(store.latest_version(ComponentKind::Serving).unwrap(), "0.16.0");
    assert!(store.latest_version(ComponentKind::Eventing).is_err());
}

#[test]
fn test_compare_versions() {
    use std::cmp::Ordering;
    assert_eq!(compare_versions("0.16.0", "0.9.0"), Ordering::Greater);
    assert_eq!(compare_versions("0.15.1", "0.15.1"), Ordering::Equal);
    assert_eq!(compare_versions("0.15.0", "0.15.1"), Ordering::Less);
}

#[test]
fn test_parse_documents_skips_empty() {
    let docs = parse_documents("---\n# only a comment\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: a\n---\n").unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["kind"], "Namespace");
}

#[test]
fn test_append_later_copy_wins_in_place() {
    let base = ManifestSet::from_values([config_map("a", "1"), config_map("b", "1")]).unwrap();
    let extra = ManifestSet::from_values([config_map("a", "2"), config_map("c", "1")]).unwrap();

    let merged = base.append(&extra);
    let names: Vec<_> = merged.ids().map(|id| id.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    let a = ResourceId::new("v1", "ConfigMap", Some("knative-serving"), "a");
    assert_eq!(merged.get(&a).unwrap().data["data"]["key"], "2");
    // The receiver is untouched
    assert_eq!(base.get(&a).unwrap().data["data"]["key"], "1");
}

#[test]
fn test_from_values_rejects_unnamed() {
    let result = ManifestSet::from_values([json!({"apiVersion": "v1", "kind": "ConfigMap"})]);
    assert!(matches!(result, Err(Error::InvalidManifest(_))));
}

#[test]
fn test_filters_partition_release() {
    let kodata = ManifestDir::new().release(ComponentKind::Serving, "0.15.0", SERVING_0_15);
    let release = kodata.store().resolve(ComponentKind::Serving, "0.15.0").unwrap();

    let crds = release.filter(is_crd);
    let rbac = release.filter(is_rbac);
    let rest = release.filter(not(is_crd)).filter(not(is_rbac));
    assert_eq!(crds.len(), 1);
    assert_eq!(rbac.len(), 2);
    assert_eq!(crds.len() + rbac.len() + rest.len(), release.len());
    assert_eq!(release.filter(by_kind("Deployment")).len(), 2);
}

#[test]
fn test_difference_between_releases() {
    let kodata = ManifestDir::new()
        .release(ComponentKind::Serving, "0.15.0", SERVING_0_15)
        .release(ComponentKind::Serving, "0.16.0", SERVING_0_16);
    let store = kodata.store();
    let previous = store.resolve(ComponentKind::Serving, "0.15.0").unwrap();
    let target = store.resolve(ComponentKind::Serving, "0.16.0").unwrap();

    let removed: Vec<_> = previous
        .difference(&target)
        .ids()
        .map(|id| id.name.clone())
        .collect();
    assert_eq!(removed, vec!["networking-certmanager"]);
}
