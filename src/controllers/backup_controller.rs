//! VolumeSnapshotBackup controller
//!
//! Watches VolumeSnapshotBackup resources plus the derived resources whose
//! readiness gates the pipeline, and triggers reconciliation.

use std::sync::Arc;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::Client;

use super::{controller_for, derived_watch, drive, owner_of, Context};
use crate::crd::{ReplicationSource, VolumeSnapshot, VolumeSnapshotBackup};
use crate::naming::BACKUP_OWNER_LABEL;

/// Run the VolumeSnapshotBackup controller
pub async fn run(client: Client, context: Arc<Context>) {
    let Some((controller, predicate)) = controller_for::<VolumeSnapshotBackup>(&client).await
    else {
        return;
    };

    let controller = controller
        .watches_stream(
            derived_watch::<VolumeSnapshot>(&client, &predicate, BACKUP_OWNER_LABEL),
            owner_of::<VolumeSnapshotBackup, VolumeSnapshot>(BACKUP_OWNER_LABEL),
        )
        .watches_stream(
            derived_watch::<PersistentVolumeClaim>(&client, &predicate, BACKUP_OWNER_LABEL),
            owner_of::<VolumeSnapshotBackup, PersistentVolumeClaim>(BACKUP_OWNER_LABEL),
        )
        .watches_stream(
            derived_watch::<ReplicationSource>(&client, &predicate, BACKUP_OWNER_LABEL),
            owner_of::<VolumeSnapshotBackup, ReplicationSource>(BACKUP_OWNER_LABEL),
        );

    drive(controller, context).await;
}
