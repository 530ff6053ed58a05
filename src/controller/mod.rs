pub mod client;
pub mod component;
pub mod context;
pub mod error;
pub mod finalize;
pub mod reconciler;
pub mod state_machine;
pub mod status;

pub use client::{ClusterClient, FIELD_MANAGER, InstanceSummary, KubeClusterClient};
pub use component::Component;
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{error_policy, reconcile};
pub use state_machine::{Stage, StageDriver, StageRunner};
pub use status::StatusManager;
