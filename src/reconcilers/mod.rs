//! Step pipelines for the VolumeSnapshotBackup and VolumeSnapshotRestore CRDs
//!
//! Each direction defines:
//! - A step context holding the workflow, the staged status and the inputs
//!   resolved by earlier steps
//! - The ordered step list run by the batch executor
//! - The cleanup plan applied once the workflow completes

pub mod backup;
pub mod restore;

use k8s_openapi::api::core::v1::ObjectReference;

use crate::builders::{identity, Owner};
use crate::crd::Workflow;
use crate::engine::{object_ref, synchronize, Engine};
use crate::error::Result;
use crate::store::{Object, Store};

/// What every step needs regardless of direction
pub struct Scope<'a, S> {
    pub engine: &'a Engine<S>,
    pub owner: Owner,
    pub owner_ref: ObjectReference,
    pub protected_namespace: String,
}

impl<'a, S: Store> Scope<'a, S> {
    pub fn new<W: Workflow>(engine: &'a Engine<S>, workflow: &W) -> Self {
        Self {
            engine,
            owner: Owner::of(workflow),
            owner_ref: object_ref(workflow),
            protected_namespace: workflow.protected_namespace().to_string(),
        }
    }

    pub fn store(&self) -> &'a S {
        &self.engine.store
    }

    /// Synchronize a derived resource in the protected namespace, or a
    /// cluster-scoped one when `namespaced` is false
    pub async fn sync<K, F>(&self, name: String, namespaced: bool, mutate: F) -> Result<K>
    where
        K: Object + Default,
        F: FnOnce(&mut K) -> Result<()> + Send,
    {
        let mut blank = K::default();
        *blank.meta_mut() = identity(
            name,
            namespaced.then_some(self.protected_namespace.as_str()),
        );
        let (obj, _) = synchronize(
            self.store(),
            self.engine.events.as_ref(),
            &self.owner_ref,
            blank,
            mutate,
        )
        .await?;
        Ok(obj)
    }

    /// Fetch a resource from the protected namespace
    pub async fn fetch<K: Object>(&self, name: &str) -> Result<Option<K>> {
        self.store()
            .get::<K>(Some(&self.protected_namespace), name)
            .await
    }

    pub fn workflow_name(&self) -> &str {
        &self.owner.name
    }
}
