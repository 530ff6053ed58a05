use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use knative_operator::controller::KubeClusterClient;
use knative_operator::health::{HealthState, run_health_server};
use knative_operator::{
    Context, KnativeEventing, KnativeServing, ManifestStore, OperatorConfig, run_controllers,
};

const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();

    if config.crd {
        print!("{}", serde_yaml::to_string(&KnativeServing::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&KnativeEventing::crd())?);
        return Ok(());
    }

    // A provider may already be installed when embedded in tests
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("knative_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!(
        manifest_root = %config.manifest_root.display(),
        reconcile_timeout = ?config.reconcile_timeout(),
        "Starting knative-operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let holder_id = config.holder_id();
    if config.pod_name.is_none() {
        warn!("POD_NAME not set, using hostname {}", holder_id);
    }

    info!(
        holder_id = %holder_id,
        namespace = %config.pod_namespace,
        lease_name = %config.lease_name,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());

    // Probes must answer even while not leading
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_params = || LeaseLockParams {
        holder_id: holder_id.clone(),
        lease_name: config.lease_name.clone(),
        lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
    };
    let lease_lock = LeaseLock::new(client.clone(), &config.pod_namespace, lease_params());

    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    let lease_renewal_handle = {
        let lease_lock = LeaseLock::new(client.clone(), &config.pod_namespace, lease_params());
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match lease_lock.try_acquire_or_renew().await {
                    Ok(result) if result.acquired_lease => {}
                    Ok(_) => {
                        // Exit so Kubernetes restarts us and we re-enter election
                        error!("Lost leadership! Shutting down...");
                        std::process::exit(1);
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let shutdown = CancellationToken::new();
    let store = Arc::new(ManifestStore::new(config.manifest_root.clone()));
    let cluster = Arc::new(KubeClusterClient::new(client.clone()));
    let ctx = Arc::new(
        Context::new(cluster, store)
            .with_health_state(health_state.clone())
            .with_reconcile_timeout(config.reconcile_timeout())
            .with_shutdown(shutdown.clone()),
    );

    let mut controller_handle = tokio::spawn(run_controllers(client, ctx));

    tokio::select! {
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Only reached on panic, loss of the lease exits the process
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false);
            info!("Marked operator as not ready");

            shutdown.cancel();
            info!(
                "Waiting up to {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            if tokio::time::timeout(
                Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
                &mut controller_handle,
            )
            .await
            .is_err()
            {
                warn!("Controllers did not stop within the grace period");
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
