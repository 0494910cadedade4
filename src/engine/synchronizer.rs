//! Idempotent create-or-update of derived resources
//!
//! The synchronizer is the only writer of derived resources. It fetches the
//! current object (or starts from a blank one carrying just the identity),
//! lets a desired-state mutator shape it, and writes only if something
//! changed. Write conflicts are returned to the caller and resolved by the
//! next reconciliation.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::error::Result;
use crate::events::{actions, reasons, EventPublisher};
use crate::metrics;
use crate::store::{display_ref, Object, Store};

/// What the synchronizer did to the target object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

impl SyncOutcome {
    fn as_str(self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
        }
    }
}

/// Whether the object has not been persisted yet
pub fn is_new<K: Object>(obj: &K) -> bool {
    obj.meta().resource_version.is_none()
}

/// Ensure the object identified by `blank` matches the state produced by `mutate`
///
/// `blank` only needs name and namespace; it is used when the object does not
/// exist yet. `mutate` must be deterministic so that a second call against an
/// unchanged object produces no write.
pub async fn synchronize<S, K, F>(
    store: &S,
    events: &dyn EventPublisher,
    owner: &ObjectReference,
    blank: K,
    mutate: F,
) -> Result<(K, SyncOutcome)>
where
    S: Store,
    K: Object,
    F: FnOnce(&mut K) -> Result<()> + Send,
{
    let namespace = blank.namespace();
    let name = blank.name_any();
    let target = display_ref::<K>(namespace.as_deref(), &name);

    let mut obj = match store.get::<K>(namespace.as_deref(), &name).await? {
        Some(existing) => existing,
        None => blank,
    };
    let creating = is_new(&obj);
    let before = serde_json::to_value(&obj)?;

    mutate(&mut obj)?;

    if !creating && serde_json::to_value(&obj)? == before {
        debug!(target = %target, "Resource already in desired state");
        return Ok((obj, SyncOutcome::Unchanged));
    }

    let (written, outcome) = if creating {
        (store.create(&obj).await?, SyncOutcome::Created)
    } else {
        (store.replace(&obj).await?, SyncOutcome::Updated)
    };

    info!(target = %target, operation = outcome.as_str(), "Synchronized resource");
    let kind = K::kind(&());
    metrics::SYNCHRONIZER_WRITES
        .with_label_values(&[kind.as_ref(), outcome.as_str()])
        .inc();

    let reason = match outcome {
        SyncOutcome::Created => reasons::CREATED,
        _ => reasons::UPDATED,
    };
    events
        .publish(
            owner,
            EventType::Normal,
            reason,
            actions::SYNCHRONIZE,
            Some(format!("{} {}", target, outcome.as_str())),
        )
        .await;

    Ok((written, outcome))
}
