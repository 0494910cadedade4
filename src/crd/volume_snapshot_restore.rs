//! VolumeSnapshotRestore Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{MoverStatus, ObjectNameRef, SourcePvcData};

/// VolumeSnapshotRestore resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datamover.oso.sh",
    version = "v1alpha1",
    kind = "VolumeSnapshotRestore",
    plural = "volumesnapshotrestores",
    singular = "volumesnapshotrestore",
    shortname = "vsr",
    namespaced,
    status = "MoverStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Batching", "type": "string", "jsonPath": ".status.batchingStatus"}"#,
    printcolumn = r#"{"name": "Snapshot Handle", "type": "string", "jsonPath": ".status.snapshotHandle"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRestoreSpec {
    /// Secret in the protected namespace holding the base restic configuration
    #[serde(default)]
    pub restic_secret_ref: ObjectNameRef,

    /// Facts copied from the VolumeSnapshotBackup that produced the data
    #[serde(default)]
    pub volume_snapshot_mover_backup_ref: BackupRef,

    /// Namespace in which derived resources are created
    #[serde(default)]
    pub protected_namespace: String,
}

/// Immutable copy of a completed backup's output
///
/// Restores never read the live VolumeSnapshotBackup, which may have been
/// mutated or deleted since the data was written.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupRef {
    #[serde(rename = "sourcePVCData", default)]
    pub source_pvc_data: SourcePvcData,

    /// Repository path the backup was written to
    #[serde(default)]
    pub resticrepository: String,

    #[serde(default)]
    pub volume_snapshot_class_name: String,
}
