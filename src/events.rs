//! Kubernetes Event recording
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so the engine can
//! emit Events visible via `kubectl describe` while tests substitute a
//! recording implementation.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about workflow records
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given resource
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// The controller name appears as the reporting component on Events
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// A published event as captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub object: String,
    pub reason: String,
    pub note: Option<String>,
}

/// Keeps every published event in memory
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        let event = RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            reason: reason.to_string(),
            note,
        };
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Event reasons
pub mod reasons {
    /// A derived resource was created
    pub const CREATED: &str = "Created";
    /// A derived resource was updated
    pub const UPDATED: &str = "Updated";
    /// The workflow moved to a new phase
    pub const PHASE_CHANGED: &str = "PhaseChanged";
    /// Validation rejected the workflow
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Derived resources were reclaimed
    pub const CLEANUP_COMPLETE: &str = "CleanupComplete";
    /// Derived resources were left behind
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
}

/// Event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const SYNCHRONIZE: &str = "Synchronize";
    pub const CLEANUP: &str = "Cleanup";
}
