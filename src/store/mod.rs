//! Access to the declarative-state substrate
//!
//! The engine reads and writes objects only through [`Store`]. [`KubeStore`]
//! talks to the Kubernetes API server; [`MemoryStore`] keeps objects in
//! process and is used to exercise the engine without a cluster.

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Any typed object the engine can read or write
pub trait Object:
    kube::Resource<DynamicType = ()>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Get/list/create/replace/delete primitives with optimistic concurrency
///
/// `namespace` is `None` for cluster-scoped kinds. Writes carrying a stale
/// `resourceVersion` fail with [`Error::Conflict`](crate::Error::Conflict).
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fetch an object, `None` if it does not exist
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// List objects, optionally filtered by a label selector
    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>>;

    /// Create an object; fails with a conflict if it already exists
    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replace an existing object
    async fn replace<K: Object>(&self, obj: &K) -> Result<K>;

    /// Delete every object of a kind matching the label selector
    async fn delete_collection<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<()>;

    /// Merge-patch the status sub-resource
    async fn patch_status<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()>;
}

/// Human-readable identity of an object, used in logs and error messages
pub fn display_ref<K: Object>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", K::kind(&()), ns, name),
        None => format!("{} {}", K::kind(&()), name),
    }
}
