mod common;
mod knative_eventing;
mod knative_serving;

pub use common::*;
pub use knative_eventing::*;
pub use knative_serving::*;

/// API group shared by the operator's custom resources
pub const GROUP: &str = "operator.knative.dev";
