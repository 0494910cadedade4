//! VolumeSnapshotBackup pipeline
//!
//! Moves a CSI snapshot out of the cluster:
//! - Clone the snapshot content and snapshot into the protected namespace
//! - Restore the clone into a claim and bind it
//! - Hand the claim to the replication engine with per-workflow credentials
//! - Wait for the replication engine to finish

use chrono::Utc;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::Scope;
use crate::builders::credentials::{self, RepositoryCredentials};
use crate::builders::replication::{self, SourceRequest, SyncProgress};
use crate::builders::{snapshot, volume};
use crate::crd::{
    MoverStatus, ReplicationRef, ReplicationSource, SourcePvcData, VolumeSnapshot,
    VolumeSnapshotBackup, VolumeSnapshotClass, VolumeSnapshotContent,
};
use crate::engine::{
    phase, validate, Batch, DerivedKind, Engine, Mover, PipelineRun, ReclaimPlan, StepOutcome,
};
use crate::error::{Error, Result};
use crate::naming;
use crate::store::Store;

/// State shared by the backup steps during one reconciliation
pub struct BackupRun<'a, S> {
    scope: Scope<'a, S>,
    vsb: &'a VolumeSnapshotBackup,
    pub status: MoverStatus,
    pub derived_present: bool,
    source_content: Option<VolumeSnapshotContent>,
    snapshot_class: Option<VolumeSnapshotClass>,
    default_storage_class: Option<String>,
    cloned_snapshot: Option<VolumeSnapshot>,
}

impl<'a, S: Store> BackupRun<'a, S> {
    pub fn new(engine: &'a Engine<S>, vsb: &'a VolumeSnapshotBackup, status: MoverStatus) -> Self {
        Self {
            scope: Scope::new(engine, vsb),
            vsb,
            status,
            derived_present: false,
            source_content: None,
            snapshot_class: None,
            default_storage_class: None,
            cloned_snapshot: None,
        }
    }

    fn source(&self) -> Result<&VolumeSnapshotContent> {
        self.source_content
            .as_ref()
            .ok_or_else(|| Error::build("VolumeSnapshotContent", "source content was not resolved"))
    }

    fn snapshot_name(&self) -> Result<String> {
        snapshot::source_snapshot_name(self.source()?)
    }
}

/// Ordered backup steps
pub fn pipeline<'a, S: Store>() -> Batch<BackupRun<'a, S>> {
    Batch::new("backup")
        .step("validate", validate_backup::<S>)
        .step("mirror_volume_snapshot_content", mirror_content::<S>)
        .step("mirror_volume_snapshot", mirror_snapshot::<S>)
        .step("wait_for_volume_snapshot", wait_for_snapshot::<S>)
        .step("create_pvc", create_pvc::<S>)
        .step("bind_pvc", bind_pvc::<S>)
        .step("create_restic_secret", create_secret::<S>)
        .step("create_replication_source", create_replication_source::<S>)
        .step("wait_for_replication", wait_for_replication::<S>)
}

fn validate_backup<'r, S: Store>(
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        validate::backup_fields(ctx.vsb)?;

        let store = ctx.scope.store();
        let content =
            validate::snapshot_content(store, &ctx.vsb.spec.volume_snapshot_content.name).await?;
        validate::credential_source(
            store,
            &ctx.scope.protected_namespace,
            &ctx.vsb.spec.restic_secret_ref.name,
        )
        .await?;
        let snapshot_class = validate::default_snapshot_class(store).await?;
        let storage_class = validate::default_storage_class(store).await?;

        ctx.source_content = Some(content);
        ctx.snapshot_class = Some(snapshot_class);
        ctx.default_storage_class = Some(storage_class.name_any());
        Ok(StepOutcome::Continue)
    })
}

fn mirror_content<'r, S: Store>(
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let snapshot_name = ctx.snapshot_name()?;
        let source = ctx.source()?;
        ctx.scope
            .sync::<VolumeSnapshotContent, _>(
                naming::cloned_content(&snapshot_name),
                false,
                |obj| {
                    snapshot::cloned_content(
                        obj,
                        source,
                        &ctx.scope.protected_namespace,
                        &ctx.scope.owner,
                    )
                },
            )
            .await?;
        ctx.derived_present = true;
        ctx.status.volume_snapshot_name = Some(snapshot_name);
        Ok(StepOutcome::Continue)
    })
}

fn mirror_snapshot<'r, S: Store>(
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let snapshot_name = ctx.snapshot_name()?;
        let source = ctx.source()?;
        ctx.scope
            .sync::<VolumeSnapshot, _>(naming::cloned_snapshot(&snapshot_name), true, |obj| {
                snapshot::cloned_snapshot(obj, source, &ctx.scope.owner)
            })
            .await?;
        Ok(StepOutcome::Continue)
    })
}

fn wait_for_snapshot<'r, S: Store>(
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let name = naming::cloned_snapshot(&ctx.snapshot_name()?);
        let Some(cloned) = ctx.scope.fetch::<VolumeSnapshot>(&name).await? else {
            return Ok(StepOutcome::NotReady);
        };

        let status = cloned.status.clone().unwrap_or_default();
        if let Some(message) = status.error.and_then(|e| e.message) {
            warn!(snapshot = %name, error = %message, "Cloned VolumeSnapshot reports an error");
            // Held as NotReady while the snapshot controller retries
            phase::upsert_condition(
                &mut ctx.status.conditions,
                phase::reconciled(
                    false,
                    format!("VolumeSnapshot {} reports an error: {}", name, message),
                    Utc::now(),
                ),
            );
            return Ok(StepOutcome::NotReady);
        }
        if status.ready_to_use != Some(true) || status.restore_size.is_none() {
            debug!(snapshot = %name, "Cloned VolumeSnapshot not ready");
            return Ok(StepOutcome::NotReady);
        }

        ctx.cloned_snapshot = Some(cloned);
        Ok(StepOutcome::Continue)
    })
}

/// Storage class of the application claim behind the source snapshot
async fn source_claim<S: Store>(
    store: &S,
    source: &VolumeSnapshotContent,
) -> Result<Option<PersistentVolumeClaim>> {
    let reference = &source.spec.volume_snapshot_ref;
    let (Some(namespace), Some(name)) = (reference.namespace.as_deref(), reference.name.as_deref())
    else {
        return Ok(None);
    };
    let Some(snapshot) = store.get::<VolumeSnapshot>(Some(namespace), name).await? else {
        return Ok(None);
    };
    let Some(claim) = snapshot.spec.source.persistent_volume_claim_name else {
        return Ok(None);
    };
    store
        .get::<PersistentVolumeClaim>(Some(namespace), &claim)
        .await
        .map(|found| {
            found.or_else(|| {
                // Claim deleted since the snapshot was taken; keep its name only
                let mut pvc = PersistentVolumeClaim::default();
                pvc.metadata.name = Some(claim.clone());
                Some(pvc)
            })
        })
}

fn create_pvc<'r, S: Store>(ctx: &'r mut BackupRun<'_, S>) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let snapshot_name = ctx.snapshot_name()?;
        let cloned = ctx
            .cloned_snapshot
            .clone()
            .ok_or_else(|| {
                Error::build("PersistentVolumeClaim", "cloned snapshot was not resolved")
            })?;

        let source_pvc = source_claim(ctx.scope.store(), ctx.source()?).await?;
        let storage_class = source_pvc
            .as_ref()
            .and_then(|pvc| pvc.spec.as_ref())
            .and_then(|spec| spec.storage_class_name.clone())
            .or_else(|| ctx.default_storage_class.clone())
            .ok_or_else(|| Error::build("PersistentVolumeClaim", "no storage class available"))?;

        let size = cloned
            .status
            .as_ref()
            .and_then(|s| s.restore_size.as_ref())
            .map(|q| q.0.clone())
            .unwrap_or_default();
        ctx.status.source_pvc_data = Some(SourcePvcData {
            name: source_pvc
                .map(|pvc| pvc.name_any())
                .unwrap_or_else(|| naming::volume_claim(&snapshot_name)),
            size,
            storage_class_name: storage_class.clone(),
        });
        ctx.status.volume_snapshot_class_name = ctx
            .source()?
            .spec
            .volume_snapshot_class_name
            .clone()
            .or_else(|| ctx.snapshot_class.as_ref().map(|c| c.name_any()));

        ctx.scope
            .sync::<PersistentVolumeClaim, _>(naming::volume_claim(&snapshot_name), true, |obj| {
                volume::volume_claim(obj, &cloned, &storage_class, &ctx.scope.owner)
            })
            .await?;
        ctx.derived_present = true;
        Ok(StepOutcome::Continue)
    })
}

fn bind_pvc<'r, S: Store>(ctx: &'r mut BackupRun<'_, S>) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let snapshot_name = ctx.snapshot_name()?;
        let claim_name = naming::volume_claim(&snapshot_name);

        ctx.scope
            .sync::<Pod, _>(naming::binding_pod(&snapshot_name), true, |obj| {
                volume::binding_pod(obj, &claim_name, &ctx.scope.owner)
            })
            .await?;

        match ctx.scope.fetch::<PersistentVolumeClaim>(&claim_name).await? {
            Some(pvc) if volume::is_bound(&pvc) => Ok(StepOutcome::Continue),
            _ => {
                debug!(claim = %claim_name, "Claim not bound yet");
                Ok(StepOutcome::NotReady)
            }
        }
    })
}

fn create_secret<'r, S: Store>(
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let snapshot_name = ctx.snapshot_name()?;
        let base = validate::credential_source(
            ctx.scope.store(),
            &ctx.scope.protected_namespace,
            &ctx.vsb.spec.restic_secret_ref.name,
        )
        .await?;
        let creds = RepositoryCredentials::from_secret(&base)?;
        let repository = credentials::backup_repository(
            &creds.base_repository,
            &ctx.scope.owner.namespace,
            ctx.scope.workflow_name(),
        );

        let secret_name = naming::credential_secret(&naming::volume_claim(&snapshot_name));
        ctx.scope
            .sync::<Secret, _>(secret_name, true, |obj| {
                credentials::credential_secret(obj, &creds, &repository, &ctx.scope.owner)
            })
            .await?;
        ctx.status.resticrepository = Some(repository);
        Ok(StepOutcome::Continue)
    })
}

fn create_replication_source<'r, S: Store>(
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let snapshot_name = ctx.snapshot_name()?;
        let claim_name = naming::volume_claim(&snapshot_name);
        let secret_name = naming::credential_secret(&claim_name);
        let name = naming::replication_source(ctx.scope.workflow_name());

        let pvc_data = ctx.status.source_pvc_data.clone().unwrap_or_default();
        let snapshot_class = ctx.status.volume_snapshot_class_name.clone().unwrap_or_default();
        let request = SourceRequest {
            trigger: ctx.scope.workflow_name(),
            claim_name: &claim_name,
            secret_name: &secret_name,
            storage_class: &pvc_data.storage_class_name,
            snapshot_class: &snapshot_class,
            prune_interval_days: ctx.scope.engine.config.prune_interval_days,
        };
        ctx.scope
            .sync::<ReplicationSource, _>(name.clone(), true, |obj| {
                replication::replication_source(obj, &request, &ctx.scope.owner)
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
    ctx: &'r mut BackupRun<'_, S>,
) -> BoxFuture<'r, Result<StepOutcome>> {
    Box::pin(async move {
        let name = naming::replication_source(ctx.scope.workflow_name());
        let Some(source) = ctx.scope.fetch::<ReplicationSource>(&name).await? else {
            return Ok(StepOutcome::NotReady);
        };

        match replication::source_progress(&source) {
            SyncProgress::Complete => {
                if let Some(reference) = ctx.status.replication_ref.as_mut() {
                    if reference.completion_time.is_none() {
                        info!(replication_source = %name, "Replication complete");
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

impl Mover for VolumeSnapshotBackup {
    fn run_pipeline<'a, S: Store>(
        engine: &'a Engine<S>,
        workflow: &'a Self,
        status: MoverStatus,
    ) -> BoxFuture<'a, PipelineRun> {
        Box::pin(async move {
            let mut run = BackupRun::new(engine, workflow, status);
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
        let mut checklist = Vec::new();
        if let Some(snapshot_name) = self
            .status
            .as_ref()
            .and_then(|s| s.volume_snapshot_name.as_deref())
        {
            let claim = naming::volume_claim(snapshot_name);
            checklist.extend([
                (DerivedKind::Pod, naming::binding_pod(snapshot_name)),
                (DerivedKind::Secret, naming::credential_secret(&claim)),
                (DerivedKind::VolumeClaim, claim),
                (DerivedKind::Snapshot, naming::cloned_snapshot(snapshot_name)),
                (DerivedKind::SnapshotContent, naming::cloned_content(snapshot_name)),
            ]);
        }
        checklist.push((
            DerivedKind::ReplicationSource,
            naming::replication_source(&owner.name),
        ));

        ReclaimPlan {
            kind: "VolumeSnapshotBackup",
            protected_namespace: self.spec.protected_namespace.clone(),
            selector: owner.selector(),
            kinds: vec![
                DerivedKind::ReplicationSource,
                DerivedKind::Pod,
                DerivedKind::Secret,
                DerivedKind::VolumeClaim,
                DerivedKind::Snapshot,
                DerivedKind::SnapshotContent,
            ],
            checklist,
        }
    }
}
