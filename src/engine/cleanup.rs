//! Reclaiming derived resources
//!
//! Once a workflow completes, every resource carrying its ownership label is
//! deleted and a checklist of known names is polled until all of them are
//! gone or the deadline passes.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crd::{ReplicationDestination, ReplicationSource, VolumeSnapshot, VolumeSnapshotContent};
use crate::error::{Error, Result};
use crate::store::{display_ref, Object, Store};

/// Kinds of resources the pipelines derive from a workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivedKind {
    SnapshotContent,
    Snapshot,
    VolumeClaim,
    Pod,
    Secret,
    ReplicationSource,
    ReplicationDestination,
}

impl DerivedKind {
    /// Snapshot contents are cluster scoped, everything else lives in the protected namespace
    fn namespace<'a>(self, protected: &'a str) -> Option<&'a str> {
        match self {
            DerivedKind::SnapshotContent => None,
            _ => Some(protected),
        }
    }

    async fn delete_owned<S: Store>(
        self,
        store: &S,
        ns: Option<&str>,
        selector: &str,
    ) -> Result<()> {
        match self {
            DerivedKind::SnapshotContent => {
                store
                    .delete_collection::<VolumeSnapshotContent>(ns, selector)
                    .await
            }
            DerivedKind::Snapshot => store.delete_collection::<VolumeSnapshot>(ns, selector).await,
            DerivedKind::VolumeClaim => {
                store
                    .delete_collection::<PersistentVolumeClaim>(ns, selector)
                    .await
            }
            DerivedKind::Pod => store.delete_collection::<Pod>(ns, selector).await,
            DerivedKind::Secret => store.delete_collection::<Secret>(ns, selector).await,
            DerivedKind::ReplicationSource => {
                store
                    .delete_collection::<ReplicationSource>(ns, selector)
                    .await
            }
            DerivedKind::ReplicationDestination => {
                store
                    .delete_collection::<ReplicationDestination>(ns, selector)
                    .await
            }
        }
    }

    async fn present<S: Store>(
        self,
        store: &S,
        ns: Option<&str>,
        name: &str,
    ) -> Result<Option<String>> {
        async fn lookup<S: Store, K: Object>(
            store: &S,
            ns: Option<&str>,
            name: &str,
        ) -> Result<Option<String>> {
            Ok(store
                .get::<K>(ns, name)
                .await?
                .map(|_| display_ref::<K>(ns, name)))
        }

        match self {
            DerivedKind::SnapshotContent => {
                lookup::<S, VolumeSnapshotContent>(store, ns, name).await
            }
            DerivedKind::Snapshot => lookup::<S, VolumeSnapshot>(store, ns, name).await,
            DerivedKind::VolumeClaim => lookup::<S, PersistentVolumeClaim>(store, ns, name).await,
            DerivedKind::Pod => lookup::<S, Pod>(store, ns, name).await,
            DerivedKind::Secret => lookup::<S, Secret>(store, ns, name).await,
            DerivedKind::ReplicationSource => lookup::<S, ReplicationSource>(store, ns, name).await,
            DerivedKind::ReplicationDestination => {
                lookup::<S, ReplicationDestination>(store, ns, name).await
            }
        }
    }
}

/// What to delete and what to wait for
#[derive(Clone, Debug, PartialEq)]
pub struct ReclaimPlan {
    /// Workflow kind, used for metrics
    pub kind: &'static str,
    pub protected_namespace: String,
    /// Label selector matching every derived resource
    pub selector: String,
    /// Kinds deleted by label
    pub kinds: Vec<DerivedKind>,
    /// Named resources that must be gone before cleanup counts as converged
    pub checklist: Vec<(DerivedKind, String)>,
}

/// Poll `check` until it reports nothing pending, the deadline passes, or
/// `cancel` fires
///
/// `check` returns the names of items still pending. The last pending list
/// is returned in [`Error::CleanupTimeout`]. Transient errors from `check`
/// are logged and retried on the next tick.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let deadline = Instant::now() + timeout;
    let mut pending = Vec::new();

    loop {
        match check().await {
            Ok(still) if still.is_empty() => return Ok(()),
            Ok(still) => {
                debug!(pending = ?still, "Waiting for resources to disappear");
                pending = still;
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Poll check failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::CleanupTimeout(pending));
        }
        let wait = interval.min(deadline - now);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep(wait) => {}
        }
    }
}

/// Delete everything the plan owns and wait for the checklist to clear
pub async fn reclaim<S: Store>(
    store: &S,
    plan: &ReclaimPlan,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    for kind in &plan.kinds {
        kind.delete_owned(store, kind.namespace(&plan.protected_namespace), &plan.selector)
            .await?;
    }
    info!(
        selector = %plan.selector,
        namespace = %plan.protected_namespace,
        "Deleted derived resources, waiting for them to disappear"
    );

    poll_until(timeout, interval, cancel, move || async move {
        let mut still = Vec::new();
        for (kind, name) in &plan.checklist {
            if let Some(found) = kind
                .present(store, kind.namespace(&plan.protected_namespace), name)
                .await?
            {
                still.push(found);
            }
        }
        Ok(still)
    })
    .await
}
