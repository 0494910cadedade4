//! Cloned snapshot content and snapshot in the protected namespace
//!
//! The clone points at the same storage snapshot handle as the source
//! content, so it is always created with a `Retain` deletion policy.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;

use super::Owner;
use crate::crd::{
    VolumeSnapshot, VolumeSnapshotContent, VolumeSnapshotContentSource, VolumeSnapshotContentSpec,
    VolumeSnapshotSource, VolumeSnapshotSpec,
};
use crate::engine::is_new;
use crate::error::{Error, Result};
use crate::naming;

/// Name of the VolumeSnapshot a source content is bound to
pub fn source_snapshot_name(source: &VolumeSnapshotContent) -> Result<String> {
    source
        .spec
        .volume_snapshot_ref
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            Error::build(
                "VolumeSnapshotContent",
                format!("{} is not bound to a VolumeSnapshot", source.name_any()),
            )
        })
}

fn snapshot_handle(source: &VolumeSnapshotContent) -> Option<String> {
    source
        .status
        .as_ref()
        .and_then(|s| s.snapshot_handle.clone())
        .or_else(|| source.spec.source.snapshot_handle.clone())
}

/// Pre-provisioned content sharing the source's snapshot handle
pub fn cloned_content(
    obj: &mut VolumeSnapshotContent,
    source: &VolumeSnapshotContent,
    protected_namespace: &str,
    owner: &Owner,
) -> Result<()> {
    let snapshot_name = source_snapshot_name(source)?;
    let handle = snapshot_handle(source).ok_or_else(|| {
        Error::build(
            "VolumeSnapshotContent",
            format!("{} has no snapshot handle", source.name_any()),
        )
    })?;

    owner.stamp(&mut obj.metadata);
    if is_new(obj) {
        obj.spec = VolumeSnapshotContentSpec {
            deletion_policy: "Retain".to_string(),
            driver: source.spec.driver.clone(),
            source: VolumeSnapshotContentSource {
                snapshot_handle: Some(handle),
                volume_handle: None,
            },
            volume_snapshot_class_name: source.spec.volume_snapshot_class_name.clone(),
            volume_snapshot_ref: ObjectReference {
                api_version: Some("snapshot.storage.k8s.io/v1".to_string()),
                kind: Some("VolumeSnapshot".to_string()),
                name: Some(naming::cloned_snapshot(&snapshot_name)),
                namespace: Some(protected_namespace.to_string()),
                ..Default::default()
            },
        };
    }
    Ok(())
}

/// Snapshot bound to the cloned content
pub fn cloned_snapshot(
    obj: &mut VolumeSnapshot,
    source: &VolumeSnapshotContent,
    owner: &Owner,
) -> Result<()> {
    let snapshot_name = source_snapshot_name(source)?;

    owner.stamp(&mut obj.metadata);
    if is_new(obj) {
        obj.spec = VolumeSnapshotSpec {
            source: VolumeSnapshotSource {
                persistent_volume_claim_name: None,
                volume_snapshot_content_name: Some(naming::cloned_content(&snapshot_name)),
            },
            volume_snapshot_class_name: source.spec.volume_snapshot_class_name.clone(),
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::owner;
    use super::super::identity;
    use super::*;
    use crate::crd::VolumeSnapshotContentStatus;

    fn source() -> VolumeSnapshotContent {
        let mut content = VolumeSnapshotContent::new(
            "snapcontent-1",
            VolumeSnapshotContentSpec {
                deletion_policy: "Delete".to_string(),
                driver: "csi.example.com".to_string(),
                source: VolumeSnapshotContentSource {
                    snapshot_handle: None,
                    volume_handle: Some("vol-1".to_string()),
                },
                volume_snapshot_class_name: Some("csi-snapclass".to_string()),
                volume_snapshot_ref: ObjectReference {
                    name: Some("snap1".to_string()),
                    namespace: Some("apps".to_string()),
                    ..Default::default()
                },
            },
        );
        content.status = Some(VolumeSnapshotContentStatus {
            snapshot_handle: Some("snap-handle-1".to_string()),
            ready_to_use: Some(true),
            restore_size: Some(1073741824),
        });
        content
    }

    #[test]
    fn cloned_content_retains_and_points_into_protected_namespace() {
        let mut obj = VolumeSnapshotContent {
            metadata: identity("snap1-clone", None),
            spec: Default::default(),
            status: None,
        };

        cloned_content(&mut obj, &source(), "protected", &owner()).unwrap();

        assert_eq!(obj.spec.deletion_policy, "Retain");
        assert_eq!(obj.spec.driver, "csi.example.com");
        assert_eq!(obj.spec.source.snapshot_handle.as_deref(), Some("snap-handle-1"));
        assert_eq!(
            obj.spec.volume_snapshot_ref.name.as_deref(),
            Some("snap1-volumesnapshot")
        );
        assert_eq!(
            obj.spec.volume_snapshot_ref.namespace.as_deref(),
            Some("protected")
        );
        // Cluster scoped, so never owned through a reference
        assert!(obj.metadata.owner_references.is_none());
    }

    #[test]
    fn cloned_snapshot_binds_to_cloned_content() {
        let mut obj = VolumeSnapshot {
            metadata: identity("snap1-volumesnapshot", Some("protected")),
            spec: Default::default(),
            status: None,
        };

        cloned_snapshot(&mut obj, &source(), &owner()).unwrap();

        assert_eq!(
            obj.spec.source.volume_snapshot_content_name.as_deref(),
            Some("snap1-clone")
        );
        assert_eq!(obj.spec.volume_snapshot_class_name.as_deref(), Some("csi-snapclass"));
    }

    #[test]
    fn unbound_source_cannot_be_cloned() {
        let mut unbound = source();
        unbound.spec.volume_snapshot_ref.name = None;
        let mut obj = VolumeSnapshot {
            metadata: identity("x", Some("protected")),
            spec: Default::default(),
            status: None,
        };

        let err = cloned_snapshot(&mut obj, &unbound, &owner()).unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
    }

    #[test]
    fn existing_objects_keep_their_spec() {
        let mut obj = VolumeSnapshotContent {
            metadata: identity("snap1-clone", None),
            spec: Default::default(),
            status: None,
        };
        obj.metadata.resource_version = Some("7".to_string());

        cloned_content(&mut obj, &source(), "protected", &owner()).unwrap();

        assert_eq!(obj.spec.deletion_policy, "");
        assert!(obj.metadata.labels.is_some());
    }
}
