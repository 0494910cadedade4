//! VolumeSnapshotRestore controller

use std::sync::Arc;

use kube::Client;

use super::{controller_for, derived_watch, drive, owner_of, Context};
use crate::crd::{ReplicationDestination, VolumeSnapshotRestore};
use crate::naming::RESTORE_OWNER_LABEL;

/// Run the VolumeSnapshotRestore controller
pub async fn run(client: Client, context: Arc<Context>) {
    let Some((controller, predicate)) = controller_for::<VolumeSnapshotRestore>(&client).await
    else {
        return;
    };

    let controller = controller.watches_stream(
        derived_watch::<ReplicationDestination>(&client, &predicate, RESTORE_OWNER_LABEL),
        owner_of::<VolumeSnapshotRestore, ReplicationDestination>(RESTORE_OWNER_LABEL),
    );

    drive(controller, context).await;
}
