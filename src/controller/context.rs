use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::controller::client::ClusterClient;
use crate::controller::error::BackoffConfig;
use crate::health::HealthState;
use crate::manifest::ManifestStore;
use crate::transform::{Extension, NoExtension};

/// Default deadline for a single reconcile pass
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Cluster access
    pub cluster: Arc<dyn ClusterClient>,
    /// Release manifests, shared by both controllers
    pub store: Arc<ManifestStore>,
    /// Platform-specific transformers
    pub extension: Arc<dyn Extension>,
    /// Health and metrics state, when the server is running
    pub health_state: Option<Arc<HealthState>>,
    /// Deadline for a single reconcile pass
    pub reconcile_timeout: Duration,
    /// Cancelled on shutdown
    pub shutdown: CancellationToken,
    /// Requeue backoff after errors
    pub backoff: BackoffConfig,
    /// Consecutive failures per instance, keyed by "kind/namespace/name"
    retries: Arc<DashMap<String, u32>>,
}

impl Context {
    pub fn new(cluster: Arc<dyn ClusterClient>, store: Arc<ManifestStore>) -> Self {
        Self {
            cluster,
            store,
            extension: Arc::new(NoExtension),
            health_state: None,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            shutdown: CancellationToken::new(),
            backoff: BackoffConfig::default(),
            retries: Arc::new(DashMap::new()),
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Record a failure and return the number of failures before it
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut entry = self.retries.entry(key.to_string()).or_insert(0);
        let previous = *entry;
        *entry = previous.saturating_add(1);
        previous
    }

    pub fn reset_failures(&self, key: &str) {
        self.retries.remove(key);
    }

    /// Record a reconciliation in the metrics, if enabled
    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        if let Some(ref state) = self.health_state {
            state
                .metrics
                .record_reconcile(kind, namespace, name, duration_secs);
        }
    }

    /// Record a reconciliation error in the metrics, if enabled
    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(kind, namespace, name);
        }
    }

    /// Publish readiness of an instance in the metrics, if enabled
    pub fn record_ready(&self, kind: &str, namespace: &str, name: &str, ready: bool) {
        if let Some(ref state) = self.health_state {
            state.metrics.set_ready(kind, namespace, name, ready);
        }
    }
}
