//! VolumeSnapshotBackup Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::MoverStatus;

/// VolumeSnapshotBackup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datamover.oso.sh",
    version = "v1alpha1",
    kind = "VolumeSnapshotBackup",
    plural = "volumesnapshotbackups",
    singular = "volumesnapshotbackup",
    shortname = "vsb",
    namespaced,
    status = "MoverStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Batching", "type": "string", "jsonPath": ".status.batchingStatus"}"#,
    printcolumn = r#"{"name": "Repository", "type": "string", "jsonPath": ".status.resticrepository"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotBackupSpec {
    /// Snapshot content to move out of the cluster
    #[serde(default)]
    pub volume_snapshot_content: ObjectNameRef,

    /// Namespace in which derived resources are created
    #[serde(default)]
    pub protected_namespace: String,

    /// Secret in the protected namespace holding the base restic configuration
    #[serde(default)]
    pub restic_secret_ref: ObjectNameRef,
}

/// Reference to an object by name
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ObjectNameRef {
    #[serde(default)]
    pub name: String,
}

impl ObjectNameRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
