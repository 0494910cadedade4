//! Status types shared by both workflow records

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a workflow record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    /// Accepted, pipeline has not completed a full pass yet
    #[default]
    Queued,
    /// Pipeline completed its first full pass
    Processing,
    /// Backup data has been handed off to the repository
    SnapshotBackupDone,
    /// Restored snapshot is available
    SnapshotRestoreDone,
    /// Workflow finished, derived resources may still exist
    Completed,
    /// Unrecoverable error, no derived resources were left behind
    Failed,
    /// Unrecoverable error after derived resources were created
    PartiallyFailed,
    /// Derived resources are being reclaimed
    Cleanup,
}

impl Phase {
    /// Failed and PartiallyFailed end the workflow
    pub fn is_failure(self) -> bool {
        matches!(self, Phase::Failed | Phase::PartiallyFailed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Queued => "Queued",
            Phase::Processing => "Processing",
            Phase::SnapshotBackupDone => "SnapshotBackupDone",
            Phase::SnapshotRestoreDone => "SnapshotRestoreDone",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
            Phase::PartiallyFailed => "PartiallyFailed",
            Phase::Cleanup => "Cleanup",
        };
        f.write_str(s)
    }
}

/// Progress of the step pipeline, independent of the phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum BatchingStatus {
    #[default]
    Queued,
    Processing,
    Completed,
}

/// Source volume descriptor
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourcePvcData {
    /// Claim name
    #[serde(default)]
    pub name: String,

    /// Claim size (e.g. "10Gi")
    #[serde(default)]
    pub size: String,

    /// Storage class of the claim
    #[serde(default)]
    pub storage_class_name: String,
}

/// Tracking data for the replication engine sub-resource
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRef {
    /// ReplicationSource or ReplicationDestination name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Status shared by VolumeSnapshotBackup and VolumeSnapshotRestore
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoverStatus {
    /// Current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Step pipeline progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batching_status: Option<BatchingStatus>,

    /// Source VolumeSnapshot the cloned resources are named after
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_name: Option<String>,

    /// Volume being moved
    #[serde(rename = "sourcePVCData", skip_serializing_if = "Option::is_none")]
    pub source_pvc_data: Option<SourcePvcData>,

    /// Repository path the data is written to or read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resticrepository: Option<String>,

    /// Snapshot class used for the cloned or restored snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    /// Replication engine sub-resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_ref: Option<ReplicationRef>,

    /// Snapshot handle of the restored content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// Set once every derived resource has been deleted
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resources_reclaimed: bool,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl MoverStatus {
    /// Whether an earlier reconciliation already produced derived artifacts
    pub fn has_derived_artifacts(&self) -> bool {
        self.volume_snapshot_name.is_some()
            || self.resticrepository.is_some()
            || self.replication_ref.is_some()
    }
}

/// Status condition
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
