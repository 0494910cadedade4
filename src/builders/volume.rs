//! Claim restored from the cloned snapshot, and the pod that binds it

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, TypedLocalObjectReference, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use kube::ResourceExt;

use super::Owner;
use crate::crd::VolumeSnapshot;
use crate::engine::is_new;
use crate::error::{Error, Result};

/// Image run by the binding pod; it only needs to stay scheduled
pub const BINDING_POD_IMAGE: &str = "registry.k8s.io/pause:3.9";

const VOLUME_NAME: &str = "data";

/// Read-write-once claim populated from `snapshot`
///
/// The size is the snapshot's restore size.
pub fn volume_claim(
    obj: &mut PersistentVolumeClaim,
    snapshot: &VolumeSnapshot,
    storage_class: &str,
    owner: &Owner,
) -> Result<()> {
    let size = snapshot
        .status
        .as_ref()
        .and_then(|s| s.restore_size.clone())
        .ok_or_else(|| {
            Error::build(
                "PersistentVolumeClaim",
                format!("VolumeSnapshot {} has no restore size", snapshot.name_any()),
            )
        })?;

    owner.stamp(&mut obj.metadata);
    if is_new(obj) {
        obj.spec = Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(storage_class.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            data_source: Some(TypedLocalObjectReference {
                api_group: Some("snapshot.storage.k8s.io".to_string()),
                kind: "VolumeSnapshot".to_string(),
                name: snapshot.name_any(),
            }),
            ..Default::default()
        });
    }
    Ok(())
}

/// Pod mounting the claim so that volumes with delayed binding get provisioned
pub fn binding_pod(obj: &mut Pod, claim_name: &str, owner: &Owner) -> Result<()> {
    owner.stamp(&mut obj.metadata);
    if is_new(obj) {
        obj.spec = Some(PodSpec {
            containers: vec![Container {
                name: "bind".to_string(),
                image: Some(BINDING_POD_IMAGE.to_string()),
                volume_mounts: Some(vec![VolumeMount {
                    name: VOLUME_NAME.to_string(),
                    mount_path: "/mnt".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: VOLUME_NAME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    read_only: None,
                }),
                ..Default::default()
            }]),
            restart_policy: Some("Always".to_string()),
            ..Default::default()
        });
    }
    Ok(())
}

/// Whether the claim has been bound to a volume
pub fn is_bound(pvc: &PersistentVolumeClaim) -> bool {
    pvc.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Bound")
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::owner;
    use super::super::identity;
    use super::*;
    use crate::crd::{VolumeSnapshotSpec, VolumeSnapshotStatus};
    use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn ready_snapshot() -> VolumeSnapshot {
        let mut snap = VolumeSnapshot::new("snap1-volumesnapshot", VolumeSnapshotSpec::default());
        snap.status = Some(VolumeSnapshotStatus {
            ready_to_use: Some(true),
            restore_size: Some(Quantity("10Gi".to_string())),
            ..Default::default()
        });
        snap
    }

    fn blank_claim() -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: identity("snap1-pvc", Some("protected")),
            ..Default::default()
        }
    }

    #[test]
    fn claim_is_sized_from_restore_size() {
        let mut pvc = blank_claim();
        volume_claim(&mut pvc, &ready_snapshot(), "standard", &owner()).unwrap();

        let spec = pvc.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("10Gi".to_string())));
        let source = spec.data_source.unwrap();
        assert_eq!(source.kind, "VolumeSnapshot");
        assert_eq!(source.name, "snap1-volumesnapshot");
    }

    #[test]
    fn claim_needs_a_restore_size() {
        let mut snap = ready_snapshot();
        snap.status = None;
        let mut pvc = blank_claim();

        let err = volume_claim(&mut pvc, &snap, "standard", &owner()).unwrap_err();
        assert!(err.to_string().contains("restore size"));
        assert!(pvc.spec.is_none());
    }

    #[test]
    fn binding_pod_mounts_the_claim() {
        let mut pod = Pod {
            metadata: identity("snap1-pod", Some("protected")),
            ..Default::default()
        };
        binding_pod(&mut pod, "snap1-pvc", &owner()).unwrap();

        let spec = pod.spec.unwrap();
        let volume = &spec.volumes.unwrap()[0];
        assert_eq!(
            volume.persistent_volume_claim.as_ref().map(|c| c.claim_name.as_str()),
            Some("snap1-pvc")
        );
        assert_eq!(spec.containers[0].image.as_deref(), Some(BINDING_POD_IMAGE));
    }

    #[test]
    fn bound_claims() {
        let mut pvc = blank_claim();
        assert!(!is_bound(&pvc));
        pvc.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        });
        assert!(is_bound(&pvc));
    }
}
