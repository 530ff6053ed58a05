//! Operator configuration from flags and environment

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default lease used for leader election
pub const DEFAULT_LEASE_NAME: &str = "knative-operator-leader";

#[derive(Parser, Debug, Clone)]
#[command(name = "knative-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Print the CustomResourceDefinitions as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Directory holding the release manifests, one subdirectory per component
    #[arg(long, env = "KO_DATA_PATH", default_value = "/var/run/ko")]
    pub manifest_root: PathBuf,

    /// Deadline for a single reconcile pass, in seconds
    #[arg(
        long = "reconcile-timeout",
        env = "RECONCILE_TIMEOUT_SECS",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reconcile_timeout_secs: u64,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Identity used in leader election, defaults to the hostname
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Namespace holding the leader election lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,

    #[arg(long, env = "LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    pub lease_name: String,
}

impl OperatorConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Leader election identity: the pod name, else the hostname
    pub fn holder_id(&self) -> String {
        self.pod_name.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }
}
