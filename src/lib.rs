//! Snapshot Mover Kubernetes Operator
//!
//! This operator moves CSI volume snapshots into restic repositories and
//! back, using Custom Resource Definitions (CRDs) to describe each transfer
//! and a replication engine to do the data movement.

pub mod builders;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod naming;
pub mod reconcilers;
pub mod store;

pub use error::{Error, Result};
