//! Uninstall on deletion of a component instance
//!
//! Cluster-scoped resources of a release are shared by every instance of the
//! kind, so they are only removed once every instance is being deleted.
//! CustomResourceDefinitions are always kept: deleting them would delete every
//! user resource of those types with them.

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{info, warn};

use crate::controller::component::Component;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::{finalizer_removal_patch, has_finalizer, target_version};
use crate::manifest::{ManifestSet, is_crd, is_rbac, not};
use crate::transform::ObservedState;

/// Run cleanup for an instance carrying a deletion timestamp
pub async fn finalize<K: Component>(instance: &K, ctx: &Context) -> Result<Action> {
    let kind = K::KIND;
    let finalizer = kind.finalizer();
    let deprecated = kind.deprecated_finalizer();
    let meta = instance.meta();

    if !has_finalizer(meta, &finalizer) && !has_finalizer(meta, deprecated) {
        return Ok(Action::await_change());
    }

    let instances = ctx.cluster.list_instances(kind).await?;
    if instances.iter().all(|i| i.deleting) {
        match installed_manifest(instance, ctx) {
            Ok(manifest) => uninstall(&manifest, ctx).await?,
            // No release was ever resolved from it, so nothing was installed
            Err(Error::InvalidVersion { version, .. }) => {
                warn!(version = %version, "Skipping uninstall of invalid version");
            }
            Err(e) => return Err(e),
        }
    } else {
        info!(
            remaining = instances.iter().filter(|i| !i.deleting).count(),
            "Other {} instances remain, keeping shared resources", kind
        );
    }

    if let Some(patch) = finalizer_removal_patch(meta, &[&finalizer, deprecated]) {
        let ns = instance.namespace().unwrap_or_default();
        match ctx
            .cluster
            .patch_metadata(kind, &ns, &instance.name_any(), &patch)
            .await
        {
            Ok(_) => info!("Removed finalizer {}", finalizer),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(e) => return Err(Error::KubeError(e)),
        }
    }
    Ok(Action::await_change())
}

/// Delete everything but CRDs, permissions last
pub async fn uninstall(manifest: &ManifestSet, ctx: &Context) -> Result<()> {
    let cluster = ctx.cluster.as_ref();

    let workloads = manifest.filter(not(is_crd)).filter(not(is_rbac));
    info!(resources = workloads.len(), "Deleting installed resources");
    workloads.delete(cluster).await?;

    // Roles go last so humans keep the access needed to clean up by hand
    let rbac = manifest.filter(is_rbac);
    info!(resources = rbac.len(), "Deleting RBAC resources");
    rbac.delete(cluster).await?;
    Ok(())
}

/// Manifest of what is installed: the recorded version when it converged,
/// otherwise the version that was being installed.
fn installed_manifest<K: Component>(instance: &K, ctx: &Context) -> Result<ManifestSet> {
    let status = Component::status(instance);
    let version = match status.and_then(|s| s.version.clone()) {
        Some(version) if status.is_some_and(|s| s.is_ready()) => version,
        _ => target_version(instance, ctx)?,
    };

    let release = ctx.store.resolve(K::KIND, &version)?;
    let extras = ManifestSet::from_values(instance.common_spec().extra_manifests.clone())?;
    let pipeline = instance.pipeline(&ObservedState::default(), ctx.extension.as_ref())?;
    pipeline.apply(&release.append(&extras))
}
