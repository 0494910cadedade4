//! Reconciliation engine
//!
//! [`Engine::reconcile`] drives one workflow record through its lifecycle:
//! it stamps the initial phase, runs the direction's step pipeline, folds
//! the outcome into the status, and reclaims derived resources once the
//! workflow completes. The engine only talks to the cluster through a
//! [`Store`], so the same code runs against the API server and against the
//! in-memory store in tests.

pub mod batch;
pub mod cleanup;
pub mod phase;
pub mod predicate;
pub mod synchronizer;
pub mod validate;

pub use batch::{Batch, BatchReport, StepFn, StepOutcome};
pub use cleanup::{poll_until, reclaim, DerivedKind, ReclaimPlan};
pub use predicate::{Change, OwnershipPredicate, TypeDescriptor};
pub use synchronizer::{is_new, synchronize, SyncOutcome};

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{MoverStatus, Phase, Workflow};
use crate::error::{Error, Result};
use crate::events::{actions, reasons, EventPublisher};
use crate::metrics;
use crate::store::Store;

/// Shared state for every reconciliation
pub struct Engine<S> {
    pub store: S,
    pub events: Arc<dyn EventPublisher>,
    pub config: OperatorConfig,
    /// Fired on shutdown; aborts cleanup polling
    pub shutdown: CancellationToken,
}

/// Outcome of one pass over a direction's pipeline
pub struct PipelineRun {
    pub report: BatchReport,
    /// Status with the facts recorded by the steps that ran
    pub status: MoverStatus,
    /// Whether derived resources were created or found during the pass
    pub derived_present: bool,
}

/// A workflow kind with a step pipeline and a cleanup plan
pub trait Mover: Workflow {
    /// Run the pipeline once, starting from `status`
    fn run_pipeline<'a, S: Store>(
        engine: &'a Engine<S>,
        workflow: &'a Self,
        status: MoverStatus,
    ) -> BoxFuture<'a, PipelineRun>;

    /// Resources to delete and wait for once the workflow completes
    fn reclaim_plan(&self) -> ReclaimPlan;
}

/// Reference to a workflow record used as the subject of Events
pub fn object_ref<W: Workflow>(workflow: &W) -> ObjectReference {
    workflow.object_ref(&())
}

impl<S: Store> Engine<S> {
    pub fn new(
        store: S,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            events,
            config,
            shutdown,
        }
    }

    /// Reconcile one workflow record
    ///
    /// Transient errors are returned so the controller can back off; every
    /// other outcome is recorded in the status and mapped to an [`Action`].
    pub async fn reconcile<W: Mover>(&self, namespace: &str, name: &str) -> Result<Action> {
        let kind = W::kind(&());
        let Some(workflow) = self.store.get::<W>(Some(namespace), name).await? else {
            debug!(%kind, namespace, name, "Workflow no longer exists");
            return Ok(Action::await_change());
        };
        let mut status = workflow.mover_status().cloned().unwrap_or_default();

        match status.phase {
            Some(phase) if phase.is_failure() => {
                debug!(%kind, namespace, name, %phase, "Workflow is terminal");
                return Ok(Action::await_change());
            }
            Some(Phase::Completed) if status.resources_reclaimed => {
                return Ok(Action::await_change());
            }
            Some(Phase::Completed) | Some(Phase::Cleanup) => {
                return self.collect(&workflow, status).await;
            }
            Some(_) => {}
            None => {
                let transition = phase::initialize(&mut status, Utc::now());
                status.observed_generation = workflow.meta().generation;
                self.write_status(&workflow, &status).await?;
                self.announce(&workflow, transition).await;
            }
        }

        let before = status.clone();
        let run = W::run_pipeline(self, &workflow, status).await;
        let mut next = run.status;
        let transition = phase::apply(
            W::DIRECTION,
            &mut next,
            &run.report.outcome,
            run.derived_present,
            Utc::now(),
        );
        next.observed_generation = workflow.meta().generation;

        if next != before {
            self.write_status(&workflow, &next).await?;
        }
        self.announce(&workflow, transition).await;

        match run.report.outcome {
            Ok(StepOutcome::Continue) if next.phase == Some(Phase::Completed) => {
                self.collect(&workflow, next).await
            }
            Ok(StepOutcome::Continue) => Ok(Action::requeue(std::time::Duration::ZERO)),
            Ok(StepOutcome::NotReady) => {
                debug!(
                    %kind,
                    namespace,
                    name,
                    step = run.report.last_step.unwrap_or_default(),
                    "Waiting on dependency"
                );
                Ok(Action::requeue(self.config.requeue))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(
                    %kind,
                    namespace,
                    name,
                    step = run.report.last_step.unwrap_or_default(),
                    error = %e,
                    "Workflow failed"
                );
                if matches!(e, Error::Validation(_)) {
                    self.events
                        .publish(
                            &object_ref(&workflow),
                            EventType::Warning,
                            reasons::VALIDATION_FAILED,
                            actions::RECONCILE,
                            Some(e.to_string()),
                        )
                        .await;
                }
                Ok(Action::await_change())
            }
        }
    }

    /// Reclaim derived resources of a completed workflow
    async fn collect<W: Mover>(&self, workflow: &W, mut status: MoverStatus) -> Result<Action> {
        let plan = workflow.reclaim_plan();

        if status.phase != Some(Phase::Cleanup) {
            let from = status.phase;
            status.phase = Some(Phase::Cleanup);
            self.write_status(workflow, &status).await?;
            self.announce(
                workflow,
                phase::Transition {
                    from,
                    to: Phase::Cleanup,
                },
            )
            .await;
        }

        let timer = metrics::CLEANUP_DURATION
            .with_label_values(&[plan.kind])
            .start_timer();
        let result = reclaim(
            &self.store,
            &plan,
            self.config.cleanup_timeout,
            self.config.cleanup_interval,
            &self.shutdown,
        )
        .await;
        timer.observe_duration();

        let now = Utc::now();
        match result {
            Ok(()) => {
                info!(kind = plan.kind, name = %workflow.name_any(), "Derived resources reclaimed");
                metrics::CLEANUPS
                    .with_label_values(&[plan.kind, "success"])
                    .inc();
                status.phase = Some(Phase::Completed);
                status.resources_reclaimed = true;
                phase::upsert_condition(
                    &mut status.conditions,
                    phase::reconciled(true, phase::SUCCESS_MESSAGE, now),
                );
                self.write_status(workflow, &status).await?;
                self.announce(
                    workflow,
                    phase::Transition {
                        from: Some(Phase::Cleanup),
                        to: Phase::Completed,
                    },
                )
                .await;
                self.events
                    .publish(
                        &object_ref(workflow),
                        EventType::Normal,
                        reasons::CLEANUP_COMPLETE,
                        actions::CLEANUP,
                        None,
                    )
                    .await;
                Ok(Action::await_change())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(kind = plan.kind, name = %workflow.name_any(), error = %e, "Cleanup failed");
                metrics::CLEANUPS
                    .with_label_values(&[plan.kind, "failure"])
                    .inc();
                status.phase = Some(Phase::PartiallyFailed);
                phase::upsert_condition(
                    &mut status.conditions,
                    phase::reconciled(false, e.to_string(), now),
                );
                self.write_status(workflow, &status).await?;
                self.announce(
                    workflow,
                    phase::Transition {
                        from: Some(Phase::Cleanup),
                        to: Phase::PartiallyFailed,
                    },
                )
                .await;
                self.events
                    .publish(
                        &object_ref(workflow),
                        EventType::Warning,
                        reasons::CLEANUP_FAILED,
                        actions::CLEANUP,
                        Some(e.to_string()),
                    )
                    .await;
                Ok(Action::await_change())
            }
        }
    }

    async fn write_status<W: Workflow>(&self, workflow: &W, status: &MoverStatus) -> Result<()> {
        let value = serde_json::to_value(status)?;
        self.store
            .patch_status::<W>(workflow.namespace().as_deref(), &workflow.name_any(), &value)
            .await
    }

    async fn announce<W: Workflow>(&self, workflow: &W, transition: phase::Transition) {
        if !transition.changed() {
            return;
        }
        let kind = W::kind(&());
        info!(
            %kind,
            name = %workflow.name_any(),
            from = ?transition.from,
            to = %transition.to,
            "Phase changed"
        );
        metrics::PHASE_TRANSITIONS
            .with_label_values(&[kind.as_ref(), &transition.to.to_string()])
            .inc();
        self.events
            .publish(
                &object_ref(workflow),
                EventType::Normal,
                reasons::PHASE_CHANGED,
                actions::RECONCILE,
                Some(format!("Phase is now {}", transition.to)),
            )
            .await;
    }
}
