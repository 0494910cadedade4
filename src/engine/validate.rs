//! Pre-flight checks for workflow records
//!
//! Required fields are checked first, then the cluster-wide dependencies the
//! pipelines need. Every failure is a [`Error::Validation`] whose message is
//! written verbatim into the workflow's condition.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;

use crate::crd::{
    VolumeSnapshotBackup, VolumeSnapshotClass, VolumeSnapshotContent, VolumeSnapshotRestore,
};
use crate::error::{Error, Result};
use crate::store::Store;

/// Marks the cluster default VolumeSnapshotClass
pub const DEFAULT_SNAPSHOT_CLASS_ANNOTATION: &str =
    "snapshot.storage.kubernetes.io/is-default-class";

/// Marks the cluster default StorageClass
pub const DEFAULT_STORAGE_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

fn require(value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(message));
    }
    Ok(())
}

/// Required fields of a VolumeSnapshotBackup
pub fn backup_fields(vsb: &VolumeSnapshotBackup) -> Result<()> {
    require(
        &vsb.spec.volume_snapshot_content.name,
        "vsb volumeSnapshotContent name cannot be empty",
    )?;
    require(&vsb.spec.protected_namespace, "vsb protected ns cannot be empty")?;
    require(
        &vsb.spec.restic_secret_ref.name,
        "vsb restic secret name cannot be empty",
    )?;
    Ok(())
}

/// Required fields of a VolumeSnapshotRestore, including the embedded backup facts
pub fn restore_fields(vsr: &VolumeSnapshotRestore) -> Result<()> {
    let backup = &vsr.spec.volume_snapshot_mover_backup_ref;
    require(
        &vsr.spec.restic_secret_ref.name,
        "vsr restic secret name cannot be empty",
    )?;
    require(&vsr.spec.protected_namespace, "vsr protected ns cannot be empty")?;
    require(
        &backup.source_pvc_data.name,
        "vsr source pvc name cannot be empty",
    )?;
    require(
        &backup.source_pvc_data.size,
        "vsr source pvc size cannot be empty",
    )?;
    require(
        &backup.source_pvc_data.storage_class_name,
        "vsr source pvc storage class cannot be empty",
    )?;
    require(
        &backup.resticrepository,
        "vsr restic repository cannot be empty",
    )?;
    require(
        &backup.volume_snapshot_class_name,
        "vsr volume snapshot class name cannot be empty",
    )?;
    Ok(())
}

/// The snapshot content a backup refers to must exist
pub async fn snapshot_content<S: Store>(store: &S, name: &str) -> Result<VolumeSnapshotContent> {
    store
        .get::<VolumeSnapshotContent>(None, name)
        .await?
        .ok_or_else(|| Error::validation(format!("volumeSnapshotContent {} not found", name)))
}

/// The base credential secret must exist in the protected namespace
pub async fn credential_source<S: Store>(store: &S, namespace: &str, name: &str) -> Result<Secret> {
    store
        .get::<Secret>(Some(namespace), name)
        .await?
        .ok_or_else(|| {
            Error::validation(format!("restic secret {}/{} not found", namespace, name))
        })
}

fn is_default(annotations: &std::collections::BTreeMap<String, String>, key: &str) -> bool {
    annotations.get(key).is_some_and(|v| v == "true")
}

fn exactly_one<K: ResourceExt>(mut candidates: Vec<K>, kind: &str) -> Result<K> {
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(Error::validation(format!("no default {} found", kind))),
        n => {
            let mut names: Vec<String> = candidates.iter().map(|c| c.name_any()).collect();
            names.sort();
            Err(Error::validation(format!(
                "expected exactly one default {}, found {}: {}",
                kind,
                n,
                names.join(", ")
            )))
        }
    }
}

/// The single VolumeSnapshotClass annotated as cluster default
pub async fn default_snapshot_class<S: Store>(store: &S) -> Result<VolumeSnapshotClass> {
    let defaults: Vec<VolumeSnapshotClass> = store
        .list::<VolumeSnapshotClass>(None, None)
        .await?
        .into_iter()
        .filter(|c| is_default(c.annotations(), DEFAULT_SNAPSHOT_CLASS_ANNOTATION))
        .collect();
    exactly_one(defaults, "VolumeSnapshotClass")
}

/// The single StorageClass annotated as cluster default
pub async fn default_storage_class<S: Store>(store: &S) -> Result<StorageClass> {
    let defaults: Vec<StorageClass> = store
        .list::<StorageClass>(None, None)
        .await?
        .into_iter()
        .filter(|c| is_default(c.annotations(), DEFAULT_STORAGE_CLASS_ANNOTATION))
        .collect();
    exactly_one(defaults, "StorageClass")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupRef, ObjectNameRef, SourcePvcData, VolumeSnapshotBackupSpec,
        VolumeSnapshotRestoreSpec};
    use crate::store::MemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn backup(content: &str, protected: &str, secret: &str) -> VolumeSnapshotBackup {
        VolumeSnapshotBackup::new(
            "vsb-1",
            VolumeSnapshotBackupSpec {
                volume_snapshot_content: ObjectNameRef::new(content),
                protected_namespace: protected.to_string(),
                restic_secret_ref: ObjectNameRef::new(secret),
            },
        )
    }

    fn restore(size: &str) -> VolumeSnapshotRestore {
        VolumeSnapshotRestore::new(
            "vsr-1",
            VolumeSnapshotRestoreSpec {
                restic_secret_ref: ObjectNameRef::new("restic"),
                protected_namespace: "protected".to_string(),
                volume_snapshot_mover_backup_ref: BackupRef {
                    source_pvc_data: SourcePvcData {
                        name: "data".to_string(),
                        size: size.to_string(),
                        storage_class_name: "standard".to_string(),
                    },
                    resticrepository: "s3:s3.amazonaws.com/bucket/apps/vsb-1".to_string(),
                    volume_snapshot_class_name: "csi-snapclass".to_string(),
                },
            },
        )
    }

    fn snapshot_class(name: &str, default: bool) -> VolumeSnapshotClass {
        let mut class = VolumeSnapshotClass::new(name, "csi.example.com");
        if default {
            class.metadata.annotations = Some(BTreeMap::from([(
                DEFAULT_SNAPSHOT_CLASS_ANNOTATION.to_string(),
                "true".to_string(),
            )]));
        }
        class
    }

    fn storage_class(name: &str, default: &str) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(BTreeMap::from([(
                    DEFAULT_STORAGE_CLASS_ANNOTATION.to_string(),
                    default.to_string(),
                )])),
                ..Default::default()
            },
            provisioner: "csi.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn complete_backup_passes() {
        assert!(backup_fields(&backup("snapcontent-1", "protected", "restic")).is_ok());
    }

    #[test]
    fn missing_protected_namespace_is_named() {
        let err = backup_fields(&backup("snapcontent-1", "", "restic")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("protected ns"));
    }

    #[test]
    fn missing_content_name_is_reported_first() {
        let err = backup_fields(&backup("", "", "")).unwrap_err();
        assert!(err.to_string().contains("volumeSnapshotContent"));
    }

    #[test]
    fn restore_without_size_is_rejected() {
        assert!(restore_fields(&restore("10Gi")).is_ok());
        let err = restore_fields(&restore("")).unwrap_err();
        assert!(err.to_string().contains("size"));
    }

    #[tokio::test]
    async fn missing_content_is_a_validation_error() {
        let store = MemoryStore::new();
        let err = snapshot_content(&store, "snapcontent-1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("snapcontent-1"));
    }

    #[tokio::test]
    async fn missing_base_secret_is_a_validation_error() {
        let store = MemoryStore::new();
        let err = credential_source(&store, "protected", "restic").await.unwrap_err();
        assert_eq!(err.to_string(), "restic secret protected/restic not found");
    }

    #[tokio::test]
    async fn single_default_snapshot_class_is_selected() {
        let store = MemoryStore::new();
        store.insert(&snapshot_class("a", false)).unwrap();
        store.insert(&snapshot_class("b", true)).unwrap();

        let class = default_snapshot_class(&store).await.unwrap();
        assert_eq!(class.name_any(), "b");
    }

    #[tokio::test]
    async fn two_default_snapshot_classes_are_ambiguous() {
        let store = MemoryStore::new();
        store.insert(&snapshot_class("a", true)).unwrap();
        store.insert(&snapshot_class("b", true)).unwrap();

        let err = default_snapshot_class(&store).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected exactly one default VolumeSnapshotClass, found 2: a, b"
        );
    }

    #[tokio::test]
    async fn storage_class_annotation_must_be_true() {
        let store = MemoryStore::new();
        store.insert(&storage_class("standard", "false")).unwrap();

        let err = default_storage_class(&store).await.unwrap_err();
        assert_eq!(err.to_string(), "no default StorageClass found");

        store.insert(&storage_class("fast", "true")).unwrap();
        let class = default_storage_class(&store).await.unwrap();
        assert_eq!(class.name_any(), "fast");
    }
}
