//! Kubernetes controllers for the Snapshot Mover CRDs
//!
//! Each controller watches its workflow kind plus the derived resources
//! whose progress it waits on, filters the events through an
//! [`OwnershipPredicate`], and hands surviving triggers to the engine.

mod backup_controller;
mod restore_controller;

pub use backup_controller::run as run_backup_controller;
pub use restore_controller::run as run_restore_controller;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::{future, Stream, StreamExt, TryStreamExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{api::ListParams, Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::OperatorConfig;
use crate::engine::{Engine, Mover, OwnershipPredicate, TypeDescriptor};
use crate::error::{Error, Result};
use crate::events::KubeEventPublisher;
use crate::metrics;
use crate::naming::{FIELD_MANAGER, OWNER_NAMESPACE_LABEL};
use crate::store::KubeStore;

/// Shared context for all controllers
pub struct Context {
    pub engine: Engine<KubeStore>,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, shutdown: CancellationToken) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER));
        Self {
            engine: Engine::new(KubeStore::new(client), events, config, shutdown),
        }
    }
}

/// Watch events that pass the predicate
fn admitted<K, St>(
    events: St,
    predicate: Arc<OwnershipPredicate>,
) -> impl Stream<Item = std::result::Result<K, watcher::Error>> + Send
where
    K: Resource<DynamicType = ()> + Send + 'static,
    St: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send,
{
    events.try_filter_map(move |event| {
        future::ready(Ok::<_, watcher::Error>(predicate.admit(event)))
    })
}

/// Workflow record named by a derived resource's ownership labels
pub(crate) fn owner_of<W, K>(
    label_key: &'static str,
) -> impl Fn(K) -> Option<ObjectRef<W>> + Send + Sync + 'static
where
    W: Resource<DynamicType = ()> + 'static,
    K: ResourceExt + 'static,
{
    move |obj: K| {
        let labels = obj.labels();
        let name = labels.get(label_key).filter(|n| !n.is_empty())?;
        let namespace = labels.get(OWNER_NAMESPACE_LABEL)?;
        Some(ObjectRef::new(name).within(namespace))
    }
}

/// Watch derived resources of kind `K` carrying the ownership label
pub(crate) fn derived_watch<K>(
    client: &Client,
    predicate: &Arc<OwnershipPredicate>,
    label_key: &str,
) -> impl Stream<Item = std::result::Result<K, watcher::Error>> + Send
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let api: Api<K> = Api::all(client.clone());
    admitted(
        watcher::watcher(api, WatcherConfig::default().labels(label_key)).default_backoff(),
        predicate.clone(),
    )
}

/// Build a controller for a workflow kind with the predicate on its own watch
pub(crate) async fn controller_for<W: Mover>(
    client: &Client,
) -> Option<(Controller<W>, Arc<OwnershipPredicate>)> {
    let kind = W::kind(&());
    let api: Api<W> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("{} CRD not installed: {}", kind, e);
        return None;
    }

    let predicate = Arc::new(OwnershipPredicate::new(
        TypeDescriptor::of::<W>(),
        W::DIRECTION.owner_label(),
    ));
    let (reader, writer) = reflector::store();
    let stream = admitted(
        reflector::reflector(
            writer,
            watcher::watcher(api, WatcherConfig::default()).default_backoff(),
        ),
        predicate.clone(),
    );
    Some((Controller::for_stream(stream, reader), predicate))
}

/// Drive a configured controller until shutdown
pub(crate) async fn drive<W: Mover>(controller: Controller<W>, context: Arc<Context>) {
    let kind = W::kind(&()).to_string();
    let shutdown = context.engine.shutdown.clone().cancelled_owned();

    info!("Starting {} controller", kind);

    controller
        .graceful_shutdown_on(shutdown)
        .run(reconcile::<W>, error_policy::<W>, context)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!(
                            name = %obj.name,
                            namespace = obj.namespace.as_deref().unwrap_or_default(),
                            "Reconciled {}", kind
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation error");
                    }
                }
            }
        })
        .await;

    info!("{} controller stopped", kind);
}

/// Main reconciliation function
#[instrument(
    skip(obj, ctx),
    fields(kind = %W::kind(&()), name = %obj.name_any(), namespace = obj.namespace())
)]
async fn reconcile<W: Mover>(obj: Arc<W>, ctx: Arc<Context>) -> Result<Action> {
    let kind = W::kind(&());
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[kind.as_ref()])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&[kind.as_ref()])
        .inc();

    let namespace = obj.namespace().unwrap_or_default();
    ctx.engine.reconcile::<W>(&namespace, &obj.name_any()).await
}

/// Error policy for the controllers
fn error_policy<W: Mover>(obj: Arc<W>, error: &Error, ctx: Arc<Context>) -> Action {
    let kind = W::kind(&());
    metrics::RECONCILIATION_ERRORS
        .with_label_values(&[kind.as_ref(), error_label(error)])
        .inc();

    if error.is_silent() {
        debug!(name = %obj.name_any(), error = %error, "Reconciliation interrupted, retrying");
    } else {
        error!(
            name = %obj.name_any(),
            error = %error,
            "Reconciliation failed, scheduling retry"
        );
    }

    match error {
        Error::Conflict(_) => Action::requeue(Duration::from_secs(1)),
        Error::NotFound { .. } => Action::requeue(ctx.engine.config.requeue),
        Error::Cancelled => Action::await_change(),
        Error::Kube(_) => Action::requeue(Duration::from_secs(30)),
        _ => Action::requeue(Duration::from_secs(60)),
    }
}

fn error_label(error: &Error) -> &'static str {
    match error {
        Error::Kube(_) => "kube",
        Error::Conflict(_) => "conflict",
        Error::NotFound { .. } => "not_found",
        Error::Validation(_) => "validation",
        Error::Build { .. } => "build",
        Error::Replication(_) => "replication",
        Error::CleanupTimeout(_) => "cleanup_timeout",
        Error::Cancelled => "cancelled",
        Error::Config(_) => "config",
        Error::Serialization(_) => "serialization",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{VolumeSnapshotBackup, VolumeSnapshotRestore};
    use crate::naming::{owner_labels, BACKUP_OWNER_LABEL, RESTORE_OWNER_LABEL};
    use k8s_openapi::api::core::v1::Secret;

    fn labelled(labels: std::collections::BTreeMap<String, String>) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some("snap1-pvc-secret".to_string());
        secret.metadata.namespace = Some("protected".to_string());
        secret.metadata.labels = Some(labels);
        secret
    }

    #[test]
    fn derived_resource_maps_to_owner_in_its_namespace() {
        let map = owner_of::<VolumeSnapshotBackup, Secret>(BACKUP_OWNER_LABEL);
        let found = map(labelled(owner_labels(BACKUP_OWNER_LABEL, "foo", "apps"))).unwrap();
        assert_eq!(found.name, "foo");
        assert_eq!(found.namespace.as_deref(), Some("apps"));
    }

    #[test]
    fn other_direction_labels_do_not_map() {
        let map = owner_of::<VolumeSnapshotRestore, Secret>(RESTORE_OWNER_LABEL);
        assert!(map(labelled(owner_labels(BACKUP_OWNER_LABEL, "foo", "apps"))).is_none());
    }

    #[test]
    fn error_labels_are_stable() {
        assert_eq!(error_label(&Error::Cancelled), "cancelled");
        assert_eq!(
            error_label(&Error::CleanupTimeout(vec![])),
            "cleanup_timeout"
        );
    }
}
