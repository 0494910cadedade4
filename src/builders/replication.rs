//! Replication engine requests
//!
//! Each workflow issues exactly one manual synchronization, keyed by the
//! workflow's name. The engine reports completion by echoing the trigger in
//! `status.lastManualSync`.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

use super::Owner;
use crate::crd::{
    BackupRef, ReplicationDestination, ReplicationDestinationResticSpec,
    ReplicationDestinationSpec, ReplicationSource, ReplicationSourceResticSpec,
    ReplicationSourceSpec, ReplicationTrigger, ResticRetainPolicy,
};
use crate::error::Result;

/// Condition the replication engine maintains while synchronizing
pub const SYNCHRONIZING: &str = "Synchronizing";

/// Inputs for a backup's replication source
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRequest<'a> {
    pub trigger: &'a str,
    pub claim_name: &'a str,
    pub secret_name: &'a str,
    pub storage_class: &'a str,
    pub snapshot_class: &'a str,
    pub prune_interval_days: i32,
}

fn manual(trigger: &str) -> Option<ReplicationTrigger> {
    Some(ReplicationTrigger {
        manual: Some(trigger.to_string()),
    })
}

/// Restic source reading the claim in place
pub fn replication_source(
    obj: &mut ReplicationSource,
    request: &SourceRequest<'_>,
    owner: &Owner,
) -> Result<()> {
    owner.stamp(&mut obj.metadata);
    obj.spec = ReplicationSourceSpec {
        source_pvc: request.claim_name.to_string(),
        trigger: manual(request.trigger),
        restic: Some(ReplicationSourceResticSpec {
            repository: request.secret_name.to_string(),
            copy_method: "Direct".to_string(),
            prune_interval_days: Some(request.prune_interval_days),
            retain: Some(ResticRetainPolicy {
                daily: None,
                within: Some("1d".to_string()),
            }),
            storage_class_name: Some(request.storage_class.to_string()),
            volume_snapshot_class_name: Some(request.snapshot_class.to_string()),
        }),
    };
    Ok(())
}

/// Restic destination restoring into a snapshot
pub fn replication_destination(
    obj: &mut ReplicationDestination,
    trigger: &str,
    backup: &BackupRef,
    secret_name: &str,
    owner: &Owner,
) -> Result<()> {
    owner.stamp(&mut obj.metadata);
    obj.spec = ReplicationDestinationSpec {
        trigger: manual(trigger),
        restic: Some(ReplicationDestinationResticSpec {
            repository: secret_name.to_string(),
            copy_method: "Snapshot".to_string(),
            capacity: Some(Quantity(backup.source_pvc_data.size.clone())),
            storage_class_name: Some(backup.source_pvc_data.storage_class_name.clone())
                .filter(|s| !s.is_empty()),
            access_modes: vec!["ReadWriteOnce".to_string()],
            volume_snapshot_class_name: Some(backup.volume_snapshot_class_name.clone()),
        }),
    };
    Ok(())
}

/// Progress of a manual synchronization
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgress {
    Pending,
    Complete,
    Failed(String),
}

fn failed(conditions: &[Condition]) -> Option<String> {
    conditions
        .iter()
        .find(|c| c.type_ == SYNCHRONIZING && c.status == "False" && c.reason == "Error")
        .map(|c| c.message.clone())
}

fn triggered(trigger: Option<&ReplicationTrigger>) -> Option<&str> {
    trigger.and_then(|t| t.manual.as_deref())
}

pub fn source_progress(source: &ReplicationSource) -> SyncProgress {
    let Some(status) = &source.status else {
        return SyncProgress::Pending;
    };
    if let Some(message) = failed(&status.conditions) {
        return SyncProgress::Failed(message);
    }
    match (triggered(source.spec.trigger.as_ref()), status.last_manual_sync.as_deref()) {
        (Some(expected), Some(done)) if expected == done => SyncProgress::Complete,
        _ => SyncProgress::Pending,
    }
}

/// Complete once the trigger is echoed and a snapshot has been produced
pub fn destination_progress(destination: &ReplicationDestination) -> SyncProgress {
    let Some(status) = &destination.status else {
        return SyncProgress::Pending;
    };
    if let Some(message) = failed(&status.conditions) {
        return SyncProgress::Failed(message);
    }
    let echoed = matches!(
        (triggered(destination.spec.trigger.as_ref()), status.last_manual_sync.as_deref()),
        (Some(expected), Some(done)) if expected == done
    );
    if echoed && status.latest_image.is_some() {
        SyncProgress::Complete
    } else {
        SyncProgress::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::owner;
    use super::super::identity;
    use super::*;
    use crate::crd::{ReplicationDestinationStatus, ReplicationSourceStatus, SourcePvcData};
    use k8s_openapi::api::core::v1::TypedLocalObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn request() -> SourceRequest<'static> {
        SourceRequest {
            trigger: "foo",
            claim_name: "snap1-pvc",
            secret_name: "snap1-pvc-secret",
            storage_class: "standard",
            snapshot_class: "csi-snapclass",
            prune_interval_days: 7,
        }
    }

    fn source() -> ReplicationSource {
        let mut rs = ReplicationSource {
            metadata: identity("foo-rep-src", Some("protected")),
            spec: Default::default(),
            status: None,
        };
        replication_source(&mut rs, &request(), &owner()).unwrap();
        rs
    }

    fn synchronizing_error(message: &str) -> Condition {
        Condition {
            type_: SYNCHRONIZING.to_string(),
            status: "False".to_string(),
            reason: "Error".to_string(),
            message: message.to_string(),
            last_transition_time: Time(chrono::Utc::now()),
            observed_generation: None,
        }
    }

    #[test]
    fn source_reads_claim_directly() {
        let rs = source();
        assert_eq!(rs.spec.source_pvc, "snap1-pvc");
        assert_eq!(rs.spec.trigger.and_then(|t| t.manual).as_deref(), Some("foo"));
        let restic = rs.spec.restic.unwrap();
        assert_eq!(restic.repository, "snap1-pvc-secret");
        assert_eq!(restic.copy_method, "Direct");
        assert_eq!(restic.prune_interval_days, Some(7));
    }

    #[test]
    fn source_completes_when_trigger_is_echoed() {
        let mut rs = source();
        assert_eq!(source_progress(&rs), SyncProgress::Pending);

        rs.status = Some(ReplicationSourceStatus {
            last_manual_sync: Some("other".to_string()),
            ..Default::default()
        });
        assert_eq!(source_progress(&rs), SyncProgress::Pending);

        rs.status = Some(ReplicationSourceStatus {
            last_manual_sync: Some("foo".to_string()),
            ..Default::default()
        });
        assert_eq!(source_progress(&rs), SyncProgress::Complete);
    }

    #[test]
    fn source_failure_carries_engine_message() {
        let mut rs = source();
        rs.status = Some(ReplicationSourceStatus {
            conditions: vec![synchronizing_error("repository locked")],
            ..Default::default()
        });
        assert_eq!(
            source_progress(&rs),
            SyncProgress::Failed("repository locked".to_string())
        );
    }

    #[test]
    fn destination_needs_latest_image() {
        let backup = BackupRef {
            source_pvc_data: SourcePvcData {
                name: "data".to_string(),
                size: "10Gi".to_string(),
                storage_class_name: "standard".to_string(),
            },
            resticrepository: "s3:bucket/apps/foo".to_string(),
            volume_snapshot_class_name: "csi-snapclass".to_string(),
        };
        let mut rd = ReplicationDestination {
            metadata: identity("bar-rep-dest", Some("protected")),
            spec: Default::default(),
            status: None,
        };
        replication_destination(&mut rd, "bar", &backup, "data-secret", &owner()).unwrap();

        let restic = rd.spec.restic.clone().unwrap();
        assert_eq!(restic.copy_method, "Snapshot");
        assert_eq!(restic.capacity, Some(Quantity("10Gi".to_string())));

        rd.status = Some(ReplicationDestinationStatus {
            last_manual_sync: Some("bar".to_string()),
            ..Default::default()
        });
        assert_eq!(destination_progress(&rd), SyncProgress::Pending);

        rd.status = Some(ReplicationDestinationStatus {
            last_manual_sync: Some("bar".to_string()),
            latest_image: Some(TypedLocalObjectReference {
                api_group: Some("snapshot.storage.k8s.io".to_string()),
                kind: "VolumeSnapshot".to_string(),
                name: "volsync-bar-dst-20240101".to_string(),
            }),
            ..Default::default()
        });
        assert_eq!(destination_progress(&rd), SyncProgress::Complete);
    }
}
