//! Ordered reconcile stages and the driver that runs them
//!
//! A reconcile pass is a fixed sequence of [`Stage`]s. The driver runs them in
//! order and stops at the first failure, so later stages may rely on earlier
//! ones having succeeded within the same pass. The whole pass shares a single
//! deadline and is abandoned as soon as the shutdown token fires.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::controller::error::{Error, Result};

/// Stages of a reconcile pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Pick the target version and load its manifest
    ResolveTarget,
    /// Tailor the manifest to the instance
    Transform,
    /// Drop the finalizer written by older operator releases
    MigrateFinalizer,
    /// Apply every resource of the manifest
    Install,
    /// Check that every Deployment of the manifest is available
    CheckDeployments,
    /// Delete resources of the previously installed version that are gone from the target
    PruneObsolete,
    /// Record the target as installed once everything is ready
    AdvanceVersion,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::ResolveTarget,
        Stage::Transform,
        Stage::MigrateFinalizer,
        Stage::Install,
        Stage::CheckDeployments,
        Stage::PruneObsolete,
        Stage::AdvanceVersion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolveTarget => "ResolveTarget",
            Stage::Transform => "Transform",
            Stage::MigrateFinalizer => "MigrateFinalizer",
            Stage::Install => "Install",
            Stage::CheckDeployments => "CheckDeployments",
            Stage::PruneObsolete => "PruneObsolete",
            Stage::AdvanceVersion => "AdvanceVersion",
        }
    }

    /// Whether a failure in this stage means the install itself failed
    pub fn marks_install_failure(&self) -> bool {
        matches!(
            self,
            Stage::ResolveTarget | Stage::Transform | Stage::Install
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work done for each stage of a pass
#[async_trait]
pub trait StageRunner: Send {
    async fn run_stage(&mut self, stage: Stage) -> Result<()>;
}

/// Runs [`Stage::ALL`] against a runner under a deadline
#[derive(Debug, Clone)]
pub struct StageDriver {
    deadline: Instant,
    cancel: CancellationToken,
}

impl StageDriver {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run every stage in order, returning the stages that completed.
    ///
    /// Stage errors are wrapped with the failing stage. Hitting the deadline
    /// yields [`Error::Timeout`], cancellation yields [`Error::Cancelled`].
    pub async fn run<R>(&self, runner: &mut R) -> Result<Vec<Stage>>
    where
        R: StageRunner + ?Sized,
    {
        let mut completed = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled(stage));
            }
            debug!(stage = %stage, "Running reconcile stage");

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled(stage)),
                outcome = tokio::time::timeout_at(self.deadline, runner.run_stage(stage)) => outcome,
            };

            match outcome {
                Ok(Ok(())) => completed.push(stage),
                Ok(Err(e)) => return Err(e.in_stage(stage)),
                Err(_) => return Err(Error::Timeout(stage)),
            }
        }
        Ok(completed)
    }
}
