//! VolumeSnapshotRestore pipeline
//!
//! Brings data written by a backup back into the cluster as a snapshot.
//! The replication engine restores into a new snapshot; its content's
//! snapshot handle is the artifact recorded on the workflow.

use chrono::Utc;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info};

use super::Scope;
use crate::builders::credentials::{self, RepositoryCredentials};
use crate::builders::replication::{self, SyncProgress};
use crate::crd::{
    MoverStatus, ReplicationDestination, ReplicationRef, VolumeSnapshot, VolumeSnapshotContent,
    VolumeSnapshotRestore,
};
use crate::engine::{
    validate, Batch, DerivedKind, Engine, Mover, PipelineRun, ReclaimPlan, StepOutcome,
};
use crate::error::{Error, Result};
use crate::naming;
use crate::store::Store;

/// State shared by the restore steps during one reconciliation
pub struct RestoreRun<'a, S> {
    scope: Scope<'a, S>,
    vsr: &'a VolumeSnapshotRestore,
    pub status: MoverStatus,
    pub derived_present: bool,
    latest_image: Option<String>,
}

impl<'a, S: Store> RestoreRun<'a, S> {
    pub fn new(engine: &'a Engine<S>, vsr: &'a VolumeSnapshotRestore, status: MoverStatus) -> Self {
        Self {
            scope: Scope::new(engine, vsr),
            vsr,
            status,
            derived_present: false,
            latest_image: None,
        }
    }

    fn secret_name(&self) -> String {
        let backup = &self.vsr.spec.volume_snapshot_mover_backup_ref;
        naming::credential_secret(&backup.source_pvc_data.name)
    }
}

/// Ordered restore steps
pub fn pipeline<'a, S: Store>() -> Batch<RestoreRun<'a, S>> {
    Batch::new("restore")
        .step("validate", validate_restore::<S>)
        .step("create_restic_secret", create_secret::<S>)
        .step("create_replication_destination", create_replication_destination::<S>)
        .step("wait_for_replication", wait_for_replication::<S>)
        .step("record_snapshot_handle", record_snapshot_handle::<S>)
}

fn validate_restore<'r, S: Store>(
    ctx: &'r mut RestoreRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        validate::restore_fields(ctx.vsr)?;

        let store = ctx.scope.store();
        validate::credential_source(
            store,
            &ctx.scope.protected_namespace,
            &ctx.vsr.spec.restic_secret_ref.name,
        )
        .await?;
        validate::default_snapshot_class(store).await?;
        validate::default_storage_class(store).await?;

        // Facts carried over from the backup
        let backup = &ctx.vsr.spec.volume_snapshot_mover_backup_ref;
        ctx.status.source_pvc_data = Some(backup.source_pvc_data.clone());
        ctx.status.volume_snapshot_class_name = Some(backup.volume_snapshot_class_name.clone());
        Ok(StepOutcome::Continue)
    })
}

fn create_secret<'r, S: Store>(
    ctx: &'r mut RestoreRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let base = validate::credential_source(
            ctx.scope.store(),
            &ctx.scope.protected_namespace,
            &ctx.vsr.spec.restic_secret_ref.name,
        )
        .await?;
        let creds = RepositoryCredentials::from_secret(&base)?;
        let repository = ctx
            .vsr
            .spec
            .volume_snapshot_mover_backup_ref
            .resticrepository
            .clone();

        ctx.scope
            .sync::<Secret, _>(ctx.secret_name(), true, |obj| {
                credentials::credential_secret(obj, &creds, &repository, &ctx.scope.owner)
            })
            .await?;
        ctx.derived_present = true;
        ctx.status.resticrepository = Some(repository);
        Ok(StepOutcome::Continue)
    })
}

fn create_replication_destination<'r, S: Store>(
    ctx: &'r mut RestoreRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let name = naming::replication_destination(ctx.scope.workflow_name());
        let secret_name = ctx.secret_name();
        let backup = &ctx.vsr.spec.volume_snapshot_mover_backup_ref;

        ctx.scope
            .sync::<ReplicationDestination, _>(name.clone(), true, |obj| {
                replication::replication_destination(
                    obj,
                    ctx.scope.workflow_name(),
                    backup,
                    &secret_name,
                    &ctx.scope.owner,
                )
            })
            .await?;

        let previous = ctx.status.replication_ref.take();
        ctx.status.replication_ref = Some(ReplicationRef {
            name,
            start_time: previous
                .as_ref()
                .and_then(|r| r.start_time)
                .or_else(|| Some(Utc::now())),
            completion_time: previous.and_then(|r| r.completion_time),
        });
        Ok(StepOutcome::Continue)
    })
}

fn wait_for_replication<'r, S: Store>(
    ctx: &'r mut RestoreRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let name = naming::replication_destination(ctx.scope.workflow_name());
        let Some(destination) = ctx.scope.fetch::<ReplicationDestination>(&name).await? else {
            return Ok(StepOutcome::NotReady);
        };

        match replication::destination_progress(&destination) {
            SyncProgress::Complete => {
                ctx.latest_image = destination
                    .status
                    .and_then(|s| s.latest_image)
                    .map(|image| image.name);
                if let Some(reference) = ctx.status.replication_ref.as_mut() {
                    if reference.completion_time.is_none() {
                        info!(replication_destination = %name, "Replication complete");
                        reference.completion_time = Some(Utc::now());
                    }
                }
                Ok(StepOutcome::Continue)
            }
            SyncProgress::Failed(message) => Err(Error::Replication(message)),
            SyncProgress::Pending => Ok(StepOutcome::NotReady),
        }
    })
}

fn record_snapshot_handle<'r, S: Store>(
    ctx: &'r mut RestoreRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let image = ctx
            .latest_image
            .clone()
            .ok_or_else(|| Error::build("VolumeSnapshot", "replication produced no snapshot"))?;

        let Some(snapshot) = ctx.scope.fetch::<VolumeSnapshot>(&image).await? else {
            debug!(snapshot = %image, "Restored VolumeSnapshot not visible yet");
            return Ok(StepOutcome::NotReady);
        };
        let Some(content_name) = snapshot
            .status
            .and_then(|s| s.bound_volume_snapshot_content_name)
        else {
            debug!(snapshot = %image, "Restored VolumeSnapshot not bound yet");
            return Ok(StepOutcome::NotReady);
        };
        let handle = ctx
            .scope
            .store()
            .get::<VolumeSnapshotContent>(None, &content_name)
            .await?
            .and_then(|content| content.status)
            .and_then(|status| status.snapshot_handle);

        match handle {
            Some(handle) => {
                ctx.status.snapshot_handle = Some(handle);
                Ok(StepOutcome::Continue)
            }
            None => {
                debug!(content = %content_name, "Snapshot handle not reported yet");
                Ok(StepOutcome::NotReady)
            }
        }
    })
}

impl Mover for VolumeSnapshotRestore {
    fn run_pipeline<'a, S: Store>(
        engine: &'a Engine<S>,
        workflow: &'a Self,
        status: MoverStatus,
    ) -> BoxFuture<'a, PipelineRun> {
        Box::pin(async move {
            let mut run = RestoreRun::new(engine, workflow, status);
            let report = pipeline::<S>().run(&mut run).await;
            PipelineRun {
                report,
                status: run.status,
                derived_present: run.derived_present,
            }
        })
    }

    fn reclaim_plan(&self) -> ReclaimPlan {
        let owner = crate::builders::Owner::of(self);
        let secret = naming::credential_secret(
            &self.spec.volume_snapshot_mover_backup_ref.source_pvc_data.name,
        );

        ReclaimPlan {
            kind: "VolumeSnapshotRestore",
            protected_namespace: self.spec.protected_namespace.clone(),
            selector: owner.selector(),
            kinds: vec![DerivedKind::ReplicationDestination, DerivedKind::Secret],
            checklist: vec![
                (DerivedKind::Secret, secret),
                (
                    DerivedKind::ReplicationDestination,
                    naming::replication_destination(&owner.name),
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupRef, ObjectNameRef, SourcePvcData, VolumeSnapshotRestoreSpec};

    #[test]
    fn steps_run_in_documented_order() {
        let names = pipeline::<crate::store::MemoryStore>().step_names();
        assert_eq!(
            names,
            vec![
                "validate",
                "create_restic_secret",
                "create_replication_destination",
                "wait_for_replication",
                "record_snapshot_handle",
            ]
        );
    }

    #[test]
    fn reclaim_plan_names_secret_after_source_claim() {
        let mut vsr = VolumeSnapshotRestore::new(
            "bar",
            VolumeSnapshotRestoreSpec {
                restic_secret_ref: ObjectNameRef::new("restic"),
                protected_namespace: "protected".to_string(),
                volume_snapshot_mover_backup_ref: BackupRef {
                    source_pvc_data: SourcePvcData {
                        name: "data".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            },
        );
        vsr.metadata.namespace = Some("apps".to_string());

        let plan = vsr.reclaim_plan();
        assert_eq!(
            plan.selector,
            "datamover.oso.sh/vsr-name=bar,datamover.oso.sh/owner-namespace=apps"
        );
        assert_eq!(
            plan.checklist,
            vec![
                (DerivedKind::Secret, "data-secret".to_string()),
                (DerivedKind::ReplicationDestination, "bar-rep-dest".to_string()),
            ]
        );
    }
}
