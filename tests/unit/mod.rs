// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the Knative operator
//!
//! This module contains tests for:
//! - Release manifests on disk and manifest set algebra
//! - Per-instance transformation of releases
//! - Full reconcile passes against an in-memory cluster
//! - Uninstall on deletion

#[path = "../common/mod.rs"]
mod common;

mod manifest;
mod reconciler;
