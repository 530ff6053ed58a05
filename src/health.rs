//! Probe and metrics endpoints: `/healthz`, `/readyz` and `/metrics`

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

/// Series key: one component instance
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InstanceLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl InstanceLabels {
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Per-instance reconcile metrics
pub struct Metrics {
    reconciliations: Family<InstanceLabels, Counter>,
    errors: Family<InstanceLabels, Counter>,
    duration: Family<InstanceLabels, Histogram>,
    ready: Family<InstanceLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("knative_operator");
        let reconciliations = Family::<InstanceLabels, Counter>::default();
        let errors = Family::<InstanceLabels, Counter>::default();
        let duration = Family::<InstanceLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        let ready = Family::<InstanceLabels, Gauge>::default();

        registry.register(
            "reconciliations",
            "Reconcile passes per instance",
            reconciliations.clone(),
        );
        registry.register(
            "reconciliation_errors",
            "Failed reconcile passes per instance",
            errors.clone(),
        );
        registry.register(
            "reconcile_duration_seconds",
            "Duration of a reconcile pass",
            duration.clone(),
        );
        registry.register(
            "component_ready",
            "1 when the instance is installed and its deployments are available",
            ready.clone(),
        );

        Self {
            reconciliations,
            errors,
            duration,
            ready,
            registry,
        }
    }

    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = InstanceLabels::new(kind, namespace, name);
        self.reconciliations.get_or_create(&labels).inc();
        self.duration.get_or_create(&labels).observe(duration_secs);
    }

    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        self.errors
            .get_or_create(&InstanceLabels::new(kind, namespace, name))
            .inc();
    }

    pub fn set_ready(&self, kind: &str, namespace: &str, name: &str, ready: bool) {
        self.ready
            .get_or_create(&InstanceLabels::new(kind, namespace, name))
            .set(i64::from(ready));
    }

    /// Drop the readiness series of a deleted instance
    pub fn forget(&self, kind: &str, namespace: &str, name: &str) {
        self.ready.remove(&InstanceLabels::new(kind, namespace, name));
    }

    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// State shared between the controllers and the probe server
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readiness flips once the controllers are watching
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe endpoints on all interfaces at `port`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
