pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod manifest;
pub mod transform;

pub use config::OperatorConfig;
pub use controller::{
    BackoffConfig, ClusterClient, Component, Context, Error, KubeClusterClient, Result,
    error_policy, reconcile,
};
pub use crd::{ComponentKind, KnativeEventing, KnativeServing};
pub use health::{HealthState, Metrics};
pub use manifest::{ManifestSet, ManifestStore};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

/// Run the controller for one component kind until its stream ends.
///
/// Deployments carry an owner reference to the instance that installed them,
/// so rollouts trigger a pass without waiting for the requeue.
pub async fn run_controller<K: Component>(client: Client, ctx: Arc<Context>) {
    tracing::info!("Starting controller for {} resources", K::KIND);

    let instances: Api<K> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(instances, watcher_config.clone())
        .owns(deployments, watcher_config)
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled {}: {}", K::KIND, obj.name);
                }
                Err(e) => {
                    // Watch events for an instance deleted in the meantime
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::info!("{} controller stopped", K::KIND);
}

/// Run the controllers for both component kinds sharing one context
pub async fn run_controllers(client: Client, ctx: Arc<Context>) {
    if let Some(ref state) = ctx.health_state {
        state.set_ready(true);
    }

    futures::join!(
        run_controller::<KnativeServing>(client.clone(), Arc::clone(&ctx)),
        run_controller::<KnativeEventing>(client, ctx),
    );
}
