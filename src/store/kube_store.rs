//! Store backed by the Kubernetes API server

use async_trait::async_trait;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{display_ref, Object, Store};
use crate::error::{Error, Result};
use crate::naming::FIELD_MANAGER;

/// Typed objects are converted through `DynamicObject` so that one code path
/// serves both namespaced and cluster-scoped kinds.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_dynamic<K: Object>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: Object>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Translate API status codes into the engine's error taxonomy
fn classify<K: Object>(err: kube::Error, namespace: Option<&str>, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 => {
            Error::Conflict(display_ref::<K>(namespace, name))
        }
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(
            K::kind(&()),
            namespace.map_or_else(|| name.to_string(), |ns| format!("{}/{}", ns, name)),
        ),
        _ => Error::Kube(err),
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let obj = self
            .api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify::<K>(e, namespace, name))?;
        obj.map(from_dynamic).transpose()
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let list = self.api::<K>(namespace).list(&params).await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self
            .api::<K>(namespace.as_deref())
            .create(&params, &to_dynamic(obj)?)
            .await
            .map_err(|e| classify::<K>(e, namespace.as_deref(), &name))?;
        from_dynamic(created)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let replaced = self
            .api::<K>(namespace.as_deref())
            .replace(&name, &params, &to_dynamic(obj)?)
            .await
            .map_err(|e| classify::<K>(e, namespace.as_deref(), &name))?;
        from_dynamic(replaced)
    }

    async fn delete_collection<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<()> {
        debug!(kind = %K::kind(&()), selector, "Deleting collection");
        match self
            .api::<K>(namespace)
            .delete_collection(&DeleteParams::background(), &ListParams::default().labels(selector))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn patch_status<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify::<K>(e, namespace, name))?;
        Ok(())
    }
}
