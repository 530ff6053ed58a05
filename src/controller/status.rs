//! Status and conditions management for component resources
//!
//! Every component tracks the same three conditions. The component is ready
//! only when all of them are True; the aggregate is mirrored into a `Ready`
//! condition so it shows up in `kubectl get`.

use chrono::Utc;
use tracing::debug;

use crate::controller::client::ClusterClient;
use crate::controller::error::Result;
use crate::crd::{
    ComponentKind, ComponentStatus, Condition, ConditionStatus, ConditionType, READY_CONDITION,
};

/// Reason codes written into conditions
pub mod reasons {
    pub const ERROR: &str = "Error";
    pub const NOT_READY: &str = "NotReady";
    pub const INSTALLING: &str = "Installing";
}

impl ComponentStatus {
    /// Condition of the given type, if present
    pub fn get_condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_.as_str())
    }

    /// Status of a condition; absent conditions are Unknown
    pub fn condition_status(&self, type_: ConditionType) -> ConditionStatus {
        self.get_condition(type_)
            .map(|c| ConditionStatus::parse(&c.status))
            .unwrap_or_default()
    }

    /// Add every tracked condition as Unknown unless already present
    pub fn initialize_conditions(&mut self) {
        for type_ in ConditionType::TRACKED {
            if self.get_condition(type_).is_none() {
                self.set_condition(type_, ConditionStatus::Unknown, "", "");
            }
        }
    }

    /// True when every tracked condition is True
    pub fn is_ready(&self) -> bool {
        ConditionType::TRACKED
            .iter()
            .all(|t| self.condition_status(*t) == ConditionStatus::True)
    }

    pub fn mark_install_succeeded(&mut self) {
        self.set_condition(ConditionType::InstallSucceeded, ConditionStatus::True, "", "");
        if self.condition_status(ConditionType::DependenciesInstalled) == ConditionStatus::Unknown {
            // Assume dependencies are installed unless told otherwise
            self.mark_dependencies_installed();
        }
    }

    pub fn mark_install_failed(&mut self, msg: &str) {
        self.set_condition(
            ConditionType::InstallSucceeded,
            ConditionStatus::False,
            reasons::ERROR,
            &format!("Install failed with message: {msg}"),
        );
    }

    pub fn mark_deployments_available(&mut self) {
        self.set_condition(ConditionType::DeploymentsAvailable, ConditionStatus::True, "", "");
    }

    pub fn mark_deployments_not_ready(&mut self) {
        self.set_condition(
            ConditionType::DeploymentsAvailable,
            ConditionStatus::False,
            reasons::NOT_READY,
            "Waiting on deployments",
        );
    }

    pub fn mark_dependencies_installed(&mut self) {
        self.set_condition(ConditionType::DependenciesInstalled, ConditionStatus::True, "", "");
    }

    pub fn mark_dependency_installing(&mut self, msg: &str) {
        self.set_condition(
            ConditionType::DependenciesInstalled,
            ConditionStatus::False,
            reasons::INSTALLING,
            &format!("Dependency installing: {msg}"),
        );
    }

    pub fn mark_dependency_missing(&mut self, msg: &str) {
        self.set_condition(
            ConditionType::DependenciesInstalled,
            ConditionStatus::False,
            reasons::ERROR,
            &format!("Dependency missing: {msg}"),
        );
    }

    /// Set a tracked condition and recompute `Ready`
    pub fn set_condition(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        upsert_condition(&mut self.conditions, type_.as_str(), status, reason, message);
        self.refresh_ready();
    }

    fn refresh_ready(&mut self) {
        let failing = ConditionType::TRACKED
            .iter()
            .filter_map(|t| self.get_condition(*t))
            .find(|c| ConditionStatus::parse(&c.status) == ConditionStatus::False)
            .cloned();

        let (status, reason, message) = if self.is_ready() {
            (ConditionStatus::True, String::new(), String::new())
        } else if let Some(failing) = failing {
            (ConditionStatus::False, failing.reason, failing.message)
        } else {
            (ConditionStatus::Unknown, String::new(), String::new())
        };
        upsert_condition(&mut self.conditions, READY_CONDITION, status, &reason, &message);
    }
}

/// Update a condition in place, or append it.
/// The transition time only moves when the status value changes.
fn upsert_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status.as_str() {
            existing.status = status.as_str().to_string();
            existing.last_transition_time = Some(now);
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.as_str().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(now),
        });
    }
}

/// Writes component status back to the cluster
pub struct StatusManager<'a> {
    client: &'a dyn ClusterClient,
    kind: ComponentKind,
    namespace: &'a str,
    name: &'a str,
}

impl<'a> StatusManager<'a> {
    pub fn new(
        client: &'a dyn ClusterClient,
        kind: ComponentKind,
        namespace: &'a str,
        name: &'a str,
    ) -> Self {
        Self {
            client,
            kind,
            namespace,
            name,
        }
    }

    /// Patch the status subresource if it differs from what was observed
    pub async fn update(
        &self,
        previous: Option<&ComponentStatus>,
        status: &ComponentStatus,
    ) -> Result<bool> {
        if previous == Some(status) {
            debug!(name = %self.name, "Status unchanged, skipping update");
            return Ok(false);
        }

        let patch = serde_json::json!({
            "status": status
        });
        self.client
            .patch_status(self.kind, self.namespace, self.name, &patch)
            .await?;
        Ok(true)
    }
}
