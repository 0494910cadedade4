//! Operator configuration
//!
//! Command-line flags with environment fallbacks, resolved once at startup
//! into an [`OperatorConfig`] shared by every reconciliation.

use std::time::Duration;

use clap::Parser;

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Requeue delay for steps that are not ready yet
pub const DEFAULT_REQUEUE_SECS: u64 = 5;

/// Overall deadline for derived resources to disappear
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 300;

/// Interval between cleanup checks
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 5;

/// How often the replication engine prunes the restic repository
pub const DEFAULT_PRUNE_INTERVAL_DAYS: i32 = 7;

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "snapshot-mover-operator", version, about)]
pub struct Args {
    /// Port serving /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Seconds before a workflow waiting on a dependency is reconciled again
    #[arg(long, env = "REQUEUE_SECS", default_value_t = DEFAULT_REQUEUE_SECS)]
    pub requeue_secs: u64,

    /// Seconds to wait for derived resources to disappear after completion
    #[arg(long, env = "CLEANUP_TIMEOUT_SECS", default_value_t = DEFAULT_CLEANUP_TIMEOUT_SECS)]
    pub cleanup_timeout_secs: u64,

    /// Seconds between checks while waiting for derived resources to disappear
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS)]
    pub cleanup_interval_secs: u64,

    /// Restic prune interval set on every ReplicationSource
    #[arg(long, env = "RESTIC_PRUNE_INTERVAL_DAYS", default_value_t = DEFAULT_PRUNE_INTERVAL_DAYS)]
    pub restic_prune_interval_days: i32,
}

/// Settings used by the reconciliation engine
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    pub requeue: Duration,
    pub cleanup_timeout: Duration,
    pub cleanup_interval: Duration,
    pub prune_interval_days: i32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue: Duration::from_secs(DEFAULT_REQUEUE_SECS),
            cleanup_timeout: Duration::from_secs(DEFAULT_CLEANUP_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            prune_interval_days: DEFAULT_PRUNE_INTERVAL_DAYS,
        }
    }
}

impl From<&Args> for OperatorConfig {
    fn from(args: &Args) -> Self {
        Self {
            requeue: Duration::from_secs(args.requeue_secs),
            cleanup_timeout: Duration::from_secs(args.cleanup_timeout_secs),
            cleanup_interval: Duration::from_secs(args.cleanup_interval_secs.max(1)),
            prune_interval_days: args.restic_prune_interval_days,
        }
    }
}
