//! Prometheus metrics for the Snapshot Mover Operator
//!
//! Reconciliation counters, step and cleanup timings, and the HTTP endpoint
//! that serves them alongside liveness and readiness probes.

mod prometheus;

pub use prometheus::*;
