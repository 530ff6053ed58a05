//! Reconciliation of component resources
//!
//! One generic engine serves both component kinds. A pass resolves the target
//! release, tailors it to the instance, applies it, checks that its
//! deployments came up, prunes what the previously installed release had but
//! the target does not, and finally records the target as installed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::component::Component;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::finalize;
use crate::controller::state_machine::{Stage, StageDriver, StageRunner};
use crate::controller::status::StatusManager;
use crate::manifest::{ManifestSet, by_kind, name_of};
use crate::transform::ObservedState;

/// Requeue interval while an installation is still converging
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue interval once everything is ready
pub const READY_REQUEUE: Duration = Duration::from_secs(300);

/// Main reconciliation function, shared by both component kinds
#[instrument(skip(obj, ctx), fields(kind = %K::KIND, name = %obj.name_any(), namespace = obj.namespace().unwrap_or_default()))]
pub async fn reconcile<K: Component>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let kind = K::KIND;
    let ns = obj
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = obj.name_any();

    if obj.meta().deletion_timestamp.is_some() {
        info!("Finalizing {}", kind);
        let action = finalize::finalize(obj.as_ref(), &ctx).await?;
        if let Some(ref state) = ctx.health_state {
            state.metrics.forget(kind.kind(), &ns, &name);
        }
        ctx.reset_failures(&instance_key(obj.as_ref()));
        return Ok(action);
    }

    info!("Reconciling {}", kind);
    let mut instance = (*obj).clone();

    let finalizer = kind.finalizer();
    if !has_finalizer(instance.meta(), &finalizer) {
        add_finalizer(&mut instance, &ctx, &finalizer).await?;
    }

    let previous = Component::status(&instance).cloned();
    let generation = instance.meta().generation;
    {
        let status = instance.status_mut();
        status.initialize_conditions();
        status.observed_generation = generation;
    }

    let driver = StageDriver::new(ctx.reconcile_timeout, ctx.shutdown.child_token());
    let outcome = {
        let mut pass = ReconcilePass::new(&ctx, &mut instance);
        driver.run(&mut pass).await
    };

    if let Err(e @ (Error::Timeout(_) | Error::Cancelled(_))) = outcome {
        warn!("Reconcile pass abandoned: {}", e);
        ctx.record_error(kind.kind(), &ns, &name);
        return Err(e);
    }

    let status = instance.status_mut().clone();
    let status_manager = StatusManager::new(ctx.cluster.as_ref(), kind, &ns, &name);
    let written = status_manager.update(previous.as_ref(), &status).await;

    let duration = start.elapsed().as_secs_f64();
    ctx.record_reconcile(kind.kind(), &ns, &name, duration);
    ctx.record_ready(kind.kind(), &ns, &name, status.is_ready());

    match (outcome, written) {
        (Err(e), written) => {
            if let Err(status_err) = written {
                warn!("Failed to write status after error: {}", status_err);
            }
            error!("Reconciliation failed: {}", e);
            ctx.record_error(kind.kind(), &ns, &name);
            Err(e)
        }
        (Ok(_), Err(e)) => {
            ctx.record_error(kind.kind(), &ns, &name);
            Err(e)
        }
        (Ok(_), Ok(_)) => {
            ctx.reset_failures(&instance_key(&instance));
            if status.is_ready() {
                info!(version = ?status.version, "Reconciliation completed, {} is ready", kind);
                Ok(Action::requeue(READY_REQUEUE))
            } else {
                info!("Reconciliation completed, waiting for {} to become ready", kind);
                Ok(Action::requeue(NOT_READY_REQUEUE))
            }
        }
    }
}

/// Error policy for both controllers with exponential backoff
pub fn error_policy<K: Component>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = instance_key(obj.as_ref());
    let attempt = ctx.record_failure(&key);
    let delay = ctx.backoff.delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error for {} (attempt {}): {}, requeuing in {:?}",
            key,
            attempt + 1,
            error,
            delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            key, error, delay
        );
    }

    Action::requeue(delay)
}

/// "kind/namespace/name" of an instance
pub fn instance_key<K: Component>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::KIND.kind(),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// State carried between the stages of one pass
struct ReconcilePass<'a, K: Component> {
    ctx: &'a Context,
    instance: &'a mut K,
    target_version: Option<String>,
    target: Option<ManifestSet>,
    transformed: Option<ManifestSet>,
}

impl<'a, K: Component> ReconcilePass<'a, K> {
    fn new(ctx: &'a Context, instance: &'a mut K) -> Self {
        Self {
            ctx,
            instance,
            target_version: None,
            target: None,
            transformed: None,
        }
    }

    fn namespace(&self) -> String {
        self.instance.namespace().unwrap_or_default()
    }

    fn transformed(&self) -> Result<&ManifestSet> {
        self.transformed
            .as_ref()
            .ok_or(Error::MissingObjectKey("transformed manifest"))
    }

    fn target_version(&self) -> Result<&str> {
        self.target_version
            .as_deref()
            .ok_or(Error::MissingObjectKey("target version"))
    }

    async fn resolve_target(&mut self) -> Result<()> {
        let version = target_version(self.instance, self.ctx)?;
        let release = self.ctx.store.resolve(K::KIND, &version)?;
        let extras = ManifestSet::from_values(self.instance.common_spec().extra_manifests.clone())?;
        let manifest = release.append(&extras);

        debug!(
            version = %version,
            resources = manifest.len(),
            extra = extras.len(),
            "Resolved target manifest"
        );
        self.target = Some(manifest);
        self.target_version = Some(version);
        Ok(())
    }

    async fn transform(&mut self) -> Result<()> {
        let target = self
            .target
            .as_ref()
            .ok_or(Error::MissingObjectKey("target manifest"))?;
        let observed = ObservedState::observe(target, self.ctx.cluster.as_ref()).await?;
        let pipeline = self.instance.pipeline(&observed, self.ctx.extension.as_ref())?;
        let transformed = pipeline.apply(target)?;
        debug!(transformers = ?pipeline.names(), "Transformed manifest");
        self.transformed = Some(transformed);
        Ok(())
    }

    async fn migrate_finalizer(&mut self) -> Result<()> {
        let deprecated = K::KIND.deprecated_finalizer();
        let Some(patch) = finalizer_removal_patch(self.instance.meta(), &[deprecated]) else {
            return Ok(());
        };
        let ns = self.namespace();
        let meta = self
            .ctx
            .cluster
            .patch_metadata(K::KIND, &ns, &self.instance.name_any(), &patch)
            .await?;
        refresh_metadata(self.instance.meta_mut(), meta);
        info!("Removed deprecated finalizer {}", deprecated);
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        let manifest = self.transformed()?;
        debug!(resources = manifest.len(), "Installing manifest");
        manifest.apply(self.ctx.cluster.as_ref()).await?;
        self.instance.status_mut().mark_install_succeeded();
        Ok(())
    }

    async fn check_deployments(&mut self) -> Result<()> {
        let default_ns = self.namespace();
        let deployments = self.transformed()?.filter(by_kind("Deployment"));

        let mut pending = Vec::new();
        for obj in &deployments {
            let ns = obj.metadata.namespace.as_deref().unwrap_or(&default_ns);
            let name = name_of(obj);
            let live = self.ctx.cluster.get_deployment(ns, name).await?;
            if !live.as_ref().is_some_and(is_deployment_available) {
                pending.push(name.to_string());
            }
        }

        let status = self.instance.status_mut();
        if pending.is_empty() {
            status.mark_deployments_available();
        } else {
            debug!(pending = ?pending, "Deployments not yet available");
            status.mark_deployments_not_ready();
        }
        Ok(())
    }

    async fn prune_obsolete(&mut self) -> Result<()> {
        let cluster = self.ctx.cluster.as_ref();
        // Never delete what the target release still ships
        let legacy =
            ManifestSet::new(self.instance.legacy_resources())?.difference(self.transformed()?);
        if !legacy.is_empty() {
            legacy.delete(cluster).await?;
        }

        let target_version = self.target_version()?;
        let Some(installed) = Component::status(self.instance).and_then(|s| s.version.clone())
        else {
            return Ok(());
        };
        if installed == target_version {
            return Ok(());
        }

        let release = match self.ctx.store.resolve(K::KIND, &installed) {
            Ok(release) => release,
            Err(e) => {
                warn!(
                    installed = %installed,
                    "Cannot resolve previously installed manifest, skipping prune: {}",
                    e
                );
                return Ok(());
            }
        };
        let pipeline = self
            .instance
            .pipeline(&ObservedState::default(), self.ctx.extension.as_ref())?;
        let previous = pipeline.apply(&release)?;
        let obsolete = previous.difference(self.transformed()?);

        if !obsolete.is_empty() {
            info!(
                from = %installed,
                to = %target_version,
                resources = obsolete.len(),
                "Deleting resources no longer shipped"
            );
            obsolete.delete(cluster).await?;
        }
        Ok(())
    }

    async fn advance_version(&mut self) -> Result<()> {
        let version = self.target_version()?.to_string();
        let source = format!("{}/{}", K::KIND.path_element(), version);
        let status = self.instance.status_mut();
        if !status.is_ready() {
            return Ok(());
        }
        if status.version.as_deref() != Some(version.as_str()) {
            info!(version = %version, "Installed version advanced");
        }
        status.version = Some(version);
        status.manifests = vec![source];
        Ok(())
    }
}

#[async_trait]
impl<'a, K: Component> StageRunner for ReconcilePass<'a, K> {
    async fn run_stage(&mut self, stage: Stage) -> Result<()> {
        let result = match stage {
            Stage::ResolveTarget => self.resolve_target().await,
            Stage::Transform => self.transform().await,
            Stage::MigrateFinalizer => self.migrate_finalizer().await,
            Stage::Install => self.install().await,
            Stage::CheckDeployments => self.check_deployments().await,
            Stage::PruneObsolete => self.prune_obsolete().await,
            Stage::AdvanceVersion => self.advance_version().await,
        };
        if let Err(ref e) = result {
            if stage.marks_install_failure() {
                self.instance.status_mut().mark_install_failed(&e.to_string());
            }
        }
        result
    }
}

/// Version to install: the spec's, else the installed one, else the newest available
pub fn target_version<K: Component>(instance: &K, ctx: &Context) -> Result<String> {
    let requested = instance
        .common_spec()
        .version
        .as_ref()
        .filter(|v| !v.is_empty());
    let installed = Component::status(instance).and_then(|s| s.version.as_ref());
    match requested.or(installed) {
        Some(version) => Ok(version.clone()),
        None => ctx.store.latest_version(K::KIND),
    }
}

/// A Deployment is available once it reports at least as many available
/// replicas as it wants (1 when unset)
pub fn is_deployment_available(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    available >= desired
}

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Merge patch dropping `names` from the finalizers, or `None` when none is present.
///
/// The patch carries the observed resourceVersion so a concurrent change makes
/// it fail with a conflict instead of dropping someone else's finalizer.
pub fn finalizer_removal_patch(meta: &ObjectMeta, names: &[&str]) -> Option<Value> {
    let finalizers = meta.finalizers.as_deref().unwrap_or_default();
    if !finalizers.iter().any(|f| names.contains(&f.as_str())) {
        return None;
    }
    let remaining: Vec<&String> = finalizers
        .iter()
        .filter(|f| !names.contains(&f.as_str()))
        .collect();
    Some(json!({
        "metadata": {
            "finalizers": remaining,
            "resourceVersion": meta.resource_version,
        }
    }))
}

async fn add_finalizer<K: Component>(instance: &mut K, ctx: &Context, finalizer: &str) -> Result<()> {
    let mut finalizers = instance.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": instance.meta().resource_version,
        }
    });

    let ns = instance.namespace().unwrap_or_default();
    let meta = ctx
        .cluster
        .patch_metadata(K::KIND, &ns, &instance.name_any(), &patch)
        .await?;
    refresh_metadata(instance.meta_mut(), meta);
    info!("Added finalizer {}", finalizer);
    Ok(())
}

fn refresh_metadata(local: &mut ObjectMeta, updated: ObjectMeta) {
    local.finalizers = updated.finalizers;
    if updated.resource_version.is_some() {
        local.resource_version = updated.resource_version;
    }
}
