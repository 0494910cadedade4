//! Cluster fixtures shared by the workflow tests
//!
//! Every scenario runs the engine against a [`MemoryStore`] seeded with the
//! objects an installation provides: default classes, the base restic
//! secret, and for backups the application's snapshot.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use snapshot_mover_operator::config::OperatorConfig;
use snapshot_mover_operator::crd::{
    BackupRef, MoverStatus, ObjectNameRef, SourcePvcData, VolumeSnapshot, VolumeSnapshotBackup,
    VolumeSnapshotBackupSpec, VolumeSnapshotClass, VolumeSnapshotContent,
    VolumeSnapshotContentSource, VolumeSnapshotContentSpec, VolumeSnapshotContentStatus,
    VolumeSnapshotRestore, VolumeSnapshotRestoreSpec, VolumeSnapshotSource, VolumeSnapshotSpec,
};
use snapshot_mover_operator::engine::validate::{
    DEFAULT_SNAPSHOT_CLASS_ANNOTATION, DEFAULT_STORAGE_CLASS_ANNOTATION,
};
use snapshot_mover_operator::engine::Engine;
use snapshot_mover_operator::events::RecordingEventPublisher;
use snapshot_mover_operator::store::MemoryStore;
use tokio_util::sync::CancellationToken;

pub const APP_NS: &str = "apps";
pub const PROTECTED_NS: &str = "protected";
pub const BASE_SECRET: &str = "restic";
pub const SOURCE_CONTENT: &str = "snapcontent-1";
pub const SOURCE_SNAPSHOT: &str = "snap1";
pub const APP_CLAIM: &str = "data";

// ============================================================================
// Engine
// ============================================================================

pub struct Harness {
    pub engine: Engine<MemoryStore>,
    pub events: Arc<RecordingEventPublisher>,
}

impl Harness {
    pub fn new() -> Self {
        let events = Arc::new(RecordingEventPublisher::new());
        let engine = Engine::new(
            MemoryStore::new(),
            events.clone(),
            OperatorConfig::default(),
            CancellationToken::new(),
        );
        Self { engine, events }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.engine.store
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events.events().into_iter().map(|e| e.reason).collect()
    }

    pub fn backup_status(&self, name: &str) -> MoverStatus {
        self.store()
            .fetch::<VolumeSnapshotBackup>(Some(APP_NS), name)
            .and_then(|vsb| vsb.status)
            .unwrap_or_default()
    }

    pub fn restore_status(&self, name: &str) -> MoverStatus {
        self.store()
            .fetch::<VolumeSnapshotRestore>(Some(APP_NS), name)
            .and_then(|vsr| vsr.status)
            .unwrap_or_default()
    }
}

// ============================================================================
// Installation
// ============================================================================

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

pub fn default_snapshot_class() -> VolumeSnapshotClass {
    let mut class = VolumeSnapshotClass::new("csi-snapclass", "csi.example.com");
    class.metadata.annotations = Some(BTreeMap::from([(
        DEFAULT_SNAPSHOT_CLASS_ANNOTATION.to_string(),
        "true".to_string(),
    )]));
    class
}

pub fn default_storage_class() -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            annotations: Some(BTreeMap::from([(
                DEFAULT_STORAGE_CLASS_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..meta("standard", None)
        },
        provisioner: "csi.example.com".to_string(),
        ..Default::default()
    }
}

pub fn base_secret() -> Secret {
    Secret {
        metadata: meta(BASE_SECRET, Some(PROTECTED_NS)),
        string_data: Some(BTreeMap::from([
            (
                "RESTIC_REPOSITORY".to_string(),
                "s3:s3.amazonaws.com/bucket/".to_string(),
            ),
            ("RESTIC_PASSWORD".to_string(), "hunter2".to_string()),
            ("AWS_ACCESS_KEY_ID".to_string(), "key".to_string()),
        ])),
        ..Default::default()
    }
}

/// Default classes and the base secret
pub fn seed_installation(store: &MemoryStore) {
    store.insert(&default_snapshot_class()).unwrap();
    store.insert(&default_storage_class()).unwrap();
    store.insert(&base_secret()).unwrap();
}

/// The application's claim, its snapshot and the bound content
pub fn seed_application_snapshot(store: &MemoryStore) {
    let claim = PersistentVolumeClaim {
        metadata: meta(APP_CLAIM, Some(APP_NS)),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some("fast".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    store.insert(&claim).unwrap();

    let mut snapshot = VolumeSnapshot::new(
        SOURCE_SNAPSHOT,
        VolumeSnapshotSpec {
            source: VolumeSnapshotSource {
                persistent_volume_claim_name: Some(APP_CLAIM.to_string()),
                volume_snapshot_content_name: None,
            },
            volume_snapshot_class_name: Some("csi-snapclass".to_string()),
        },
    );
    snapshot.metadata.namespace = Some(APP_NS.to_string());
    store.insert(&snapshot).unwrap();

    let mut content = VolumeSnapshotContent::new(
        SOURCE_CONTENT,
        VolumeSnapshotContentSpec {
            deletion_policy: "Delete".to_string(),
            driver: "csi.example.com".to_string(),
            source: VolumeSnapshotContentSource {
                snapshot_handle: None,
                volume_handle: Some("vol-1".to_string()),
            },
            volume_snapshot_class_name: Some("csi-snapclass".to_string()),
            volume_snapshot_ref: ObjectReference {
                name: Some(SOURCE_SNAPSHOT.to_string()),
                namespace: Some(APP_NS.to_string()),
                ..Default::default()
            },
        },
    );
    content.status = Some(VolumeSnapshotContentStatus {
        snapshot_handle: Some("snap-handle-1".to_string()),
        ready_to_use: Some(true),
        restore_size: Some(10 * 1024 * 1024 * 1024),
    });
    store.insert(&content).unwrap();
}

// ============================================================================
// Workflow records
// ============================================================================

pub fn backup_record(name: &str, protected_namespace: &str) -> VolumeSnapshotBackup {
    let mut vsb = VolumeSnapshotBackup::new(
        name,
        VolumeSnapshotBackupSpec {
            volume_snapshot_content: ObjectNameRef::new(SOURCE_CONTENT),
            protected_namespace: protected_namespace.to_string(),
            restic_secret_ref: ObjectNameRef::new(BASE_SECRET),
        },
    );
    vsb.metadata.namespace = Some(APP_NS.to_string());
    vsb
}

pub fn restore_record(name: &str) -> VolumeSnapshotRestore {
    let mut vsr = VolumeSnapshotRestore::new(
        name,
        VolumeSnapshotRestoreSpec {
            restic_secret_ref: ObjectNameRef::new(BASE_SECRET),
            protected_namespace: PROTECTED_NS.to_string(),
            volume_snapshot_mover_backup_ref: BackupRef {
                source_pvc_data: SourcePvcData {
                    name: APP_CLAIM.to_string(),
                    size: "10Gi".to_string(),
                    storage_class_name: "fast".to_string(),
                },
                resticrepository: "s3:s3.amazonaws.com/bucket/apps/foo".to_string(),
                volume_snapshot_class_name: "csi-snapclass".to_string(),
            },
        },
    );
    vsr.metadata.namespace = Some(APP_NS.to_string());
    vsr
}
