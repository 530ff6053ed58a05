//! Error types for the component controllers

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::controller::state_machine::Stage;
use crate::crd::ComponentKind;
use crate::manifest::ResourceId;

/// Error variants are named with the `Error` suffix where they wrap another
/// library's error (e.g., `KubeError`, `YamlError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No manifest for {kind} version {version} at {}", path.display())]
    ManifestNotFound {
        kind: ComponentKind,
        version: String,
        path: PathBuf,
    },

    #[error("Invalid {kind} version {version:?}: must be a single path segment")]
    InvalidVersion { kind: ComponentKind, version: String },

    #[error("Manifest for {kind} version {version} contains no resources")]
    EmptyManifest { kind: ComponentKind, version: String },

    #[error("No versions of {kind} available under {}", path.display())]
    NoVersionsAvailable { kind: ComponentKind, path: PathBuf },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Transformer {transformer} failed on {resource}: {message}")]
    Transform {
        transformer: String,
        resource: String,
        message: String,
    },

    #[error("Failed to apply {resource}: {source}")]
    Apply {
        resource: ResourceId,
        source: kube::Error,
    },

    #[error("Failed to delete {resource}: {source}")]
    Delete {
        resource: ResourceId,
        source: kube::Error,
    },

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        source: Box<Error>,
    },

    #[error("Stage {0} exceeded the reconcile deadline")]
    Timeout(Stage),

    #[error("Reconciliation cancelled during stage {0}")]
    Cancelled(Stage),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),
}

impl Error {
    /// Wrap an error with the stage it occurred in
    pub fn in_stage(self, stage: Stage) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The error without stage wrapping
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if the underlying Kubernetes error is a 404
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::KubeError(kube::Error::Api(resp))
            | Error::Apply {
                source: kube::Error::Api(resp),
                ..
            }
            | Error::Delete {
                source: kube::Error::Api(resp),
                ..
            } => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Stage { source, .. } => source.is_retryable(),
            // Kubernetes API errors are often retryable
            Error::KubeError(e) | Error::Apply { source: e, .. } | Error::Delete { source: e, .. } => {
                match e {
                    kube::Error::Api(api_err) => {
                        // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                        let code = api_err.code;
                        if (400..500).contains(&code) {
                            return code == 409 || code == 429;
                        }
                        true
                    }
                    // Network and other errors are retryable
                    _ => true,
                }
            }
            Error::Timeout(_) | Error::Cancelled(_) => true,
            Error::FinalizerError(_) => true,
            // A release may be added to the image later
            Error::ManifestNotFound { .. } | Error::NoVersionsAvailable { .. } => true,
            Error::Io { .. } => true,
            Error::EmptyManifest { .. }
            | Error::InvalidVersion { .. }
            | Error::InvalidManifest(_)
            | Error::Transform { .. }
            | Error::SerializationError(_)
            | Error::YamlError(_)
            | Error::MissingObjectKey(_)
            | Error::InvalidConfig(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for a spec change or manual intervention
            self.max_delay
        }
    }
}
