//! Ordered step execution
//!
//! A batch runs its steps strictly in order against a shared context and
//! stops at the first step that is not ready or fails. Batches are re-run
//! from the top on every reconciliation, so each step must be idempotent.

use futures::future::BoxFuture;
use tracing::{debug, info_span, Instrument};

use crate::error::Result;
use crate::metrics;

/// What a successful step tells the executor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Proceed to the next step
    Continue,
    /// A dependency is not ready; stop without reporting an error
    NotReady,
}

/// A step borrows the context mutably for the duration of its future
pub type StepFn<C> = for<'r> fn(&'r mut C) -> BoxFuture<'r, Result<StepOutcome>>;

/// Result of running a batch
#[derive(Debug)]
pub struct BatchReport {
    /// Name of the last step that ran
    pub last_step: Option<&'static str>,
    /// Number of steps that ran
    pub executed: usize,
    /// Outcome of the last step that ran
    pub outcome: Result<StepOutcome>,
}

impl BatchReport {
    /// Every step ran and returned `Continue`
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, Ok(StepOutcome::Continue))
    }
}

/// Named steps executed in insertion order
pub struct Batch<C> {
    name: &'static str,
    steps: Vec<(&'static str, StepFn<C>)>,
}

impl<C: Send> Batch<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, name: &'static str, step: StepFn<C>) -> Self {
        self.steps.push((name, step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(name, _)| *name).collect()
    }

    /// Run steps in order, stopping at the first `NotReady` or error
    pub async fn run(&self, ctx: &mut C) -> BatchReport {
        let mut report = BatchReport {
            last_step: None,
            executed: 0,
            outcome: Ok(StepOutcome::Continue),
        };

        for (name, step) in &self.steps {
            let timer = metrics::STEP_DURATION
                .with_label_values(&[self.name, *name])
                .start_timer();
            let outcome = step(&mut *ctx)
                .instrument(info_span!("step", batch = self.name, step = *name))
                .await;
            timer.observe_duration();

            report.last_step = Some(*name);
            report.executed += 1;

            match outcome {
                Ok(StepOutcome::Continue) => {
                    debug!(batch = self.name, step = *name, "Step complete");
                }
                Ok(StepOutcome::NotReady) => {
                    debug!(batch = self.name, step = *name, "Step not ready");
                    report.outcome = Ok(StepOutcome::NotReady);
                    return report;
                }
                Err(e) => {
                    report.outcome = Err(e);
                    return report;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct Trace {
        ran: Vec<&'static str>,
    }

    fn a(ctx: &mut Trace) -> BoxFuture<'_, Result<StepOutcome>> {
        Box::pin(async move {
            ctx.ran.push("a");
            Ok(StepOutcome::Continue)
        })
    }

    fn b_not_ready(ctx: &mut Trace) -> BoxFuture<'_, Result<StepOutcome>> {
        Box::pin(async move {
            ctx.ran.push("b");
            Ok(StepOutcome::NotReady)
        })
    }

    fn b_fails(ctx: &mut Trace) -> BoxFuture<'_, Result<StepOutcome>> {
        Box::pin(async move {
            ctx.ran.push("b");
            Err(Error::validation("b failed"))
        })
    }

    fn c(ctx: &mut Trace) -> BoxFuture<'_, Result<StepOutcome>> {
        Box::pin(async move {
            ctx.ran.push("c");
            Ok(StepOutcome::Continue)
        })
    }

    #[tokio::test]
    async fn runs_all_steps_in_order() {
        let batch = Batch::<Trace>::new("test").step("a", a).step("c", c);
        let mut trace = Trace::default();

        let report = batch.run(&mut trace).await;

        assert!(report.is_complete());
        assert_eq!(trace.ran, vec!["a", "c"]);
        assert_eq!(report.last_step, Some("c"));
        assert_eq!(report.executed, 2);
    }

    #[tokio::test]
    async fn not_ready_short_circuits_without_error() {
        let batch = Batch::<Trace>::new("test")
            .step("a", a)
            .step("b", b_not_ready)
            .step("c", c);
        let mut trace = Trace::default();

        let report = batch.run(&mut trace).await;

        assert_eq!(trace.ran, vec!["a", "b"]);
        assert!(matches!(report.outcome, Ok(StepOutcome::NotReady)));
        assert_eq!(report.last_step, Some("b"));
    }

    #[tokio::test]
    async fn error_short_circuits_with_error() {
        let batch = Batch::<Trace>::new("test")
            .step("a", a)
            .step("b", b_fails)
            .step("c", c);
        let mut trace = Trace::default();

        let report = batch.run(&mut trace).await;

        assert_eq!(trace.ran, vec!["a", "b"]);
        match report.outcome {
            Err(Error::Validation(msg)) => assert_eq!(msg, "b failed"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn empty_batch_is_complete() {
        let batch: Batch<Trace> = Batch::new("empty");
        let report = tokio_test::block_on(batch.run(&mut Trace::default()));
        assert!(report.is_complete());
        assert_eq!(report.last_step, None);
    }
}
