//! Resource types owned by other controllers
//!
//! The CSI snapshot controller owns `snapshot.storage.k8s.io` and the
//! replication engine owns `volsync.backube`. Only the fields the operator
//! reads or writes are modelled; their CRDs are installed by those projects.

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ObjectReference, TypedLocalObjectReference};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition as MetaCondition, ObjectMeta};
use k8s_openapi::ClusterResourceScope;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

// =============================================================================
// snapshot.storage.k8s.io
// =============================================================================

/// VolumeSnapshotContent (cluster scoped)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshotContent",
    plural = "volumesnapshotcontents",
    status = "VolumeSnapshotContentStatus",
    schema = "disabled",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSpec {
    #[serde(default)]
    pub deletion_policy: String,

    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub source: VolumeSnapshotContentSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    #[serde(default)]
    pub volume_snapshot_ref: ObjectReference,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_handle: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// Restore size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,
}

/// VolumeSnapshot (namespaced)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    namespaced,
    status = "VolumeSnapshotStatus",
    schema = "disabled",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    #[serde(default)]
    pub source: VolumeSnapshotSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_volume_snapshot_content_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<VolumeSnapshotError>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VolumeSnapshotError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// VolumeSnapshotClass (cluster scoped)
///
/// Hand-written because the class carries `driver` and `deletionPolicy` at
/// the top level rather than under a `spec`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    #[serde(default = "VolumeSnapshotClass::default_api_version")]
    pub api_version: String,

    #[serde(default = "VolumeSnapshotClass::default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub deletion_policy: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl VolumeSnapshotClass {
    const API_VERSION: &'static str = "snapshot.storage.k8s.io/v1";
    const KIND: &'static str = "VolumeSnapshotClass";

    fn default_api_version() -> String {
        Self::API_VERSION.to_string()
    }

    fn default_kind() -> String {
        Self::KIND.to_string()
    }

    pub fn new(name: &str, driver: &str) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            driver: driver.to_string(),
            deletion_policy: "Delete".to_string(),
            parameters: BTreeMap::new(),
        }
    }
}

impl kube::Resource for VolumeSnapshotClass {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(Self::KIND)
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("snapshot.storage.k8s.io")
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("v1")
    }

    fn api_version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(Self::API_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("volumesnapshotclasses")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// =============================================================================
// volsync.backube
// =============================================================================

/// Manual trigger shared by sources and destinations
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<String>,
}

/// Retention policy for restic snapshots
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResticRetainPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub within: Option<String>,
}

/// ReplicationSource (namespaced)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "volsync.backube",
    version = "v1alpha1",
    kind = "ReplicationSource",
    plural = "replicationsources",
    namespaced,
    status = "ReplicationSourceStatus",
    schema = "disabled",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSourceSpec {
    #[serde(rename = "sourcePVC")]
    pub source_pvc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ReplicationTrigger>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restic: Option<ReplicationSourceResticSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSourceResticSpec {
    /// Name of the secret holding the repository configuration
    pub repository: String,

    pub copy_method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune_interval_days: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain: Option<ResticRetainPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSourceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_manual_sync: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MetaCondition>,
}

/// ReplicationDestination (namespaced)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "volsync.backube",
    version = "v1alpha1",
    kind = "ReplicationDestination",
    plural = "replicationdestinations",
    namespaced,
    status = "ReplicationDestinationStatus",
    schema = "disabled",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ReplicationTrigger>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restic: Option<ReplicationDestinationResticSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationResticSpec {
    /// Name of the secret holding the repository configuration
    pub repository: String,

    pub copy_method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_manual_sync: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    /// Snapshot produced by the most recent synchronization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<TypedLocalObjectReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MetaCondition>,
}
