//! In-process store
//!
//! Models the parts of API server behavior the engine depends on:
//! resource versions with conflict detection, status kept apart from the
//! main resource, label-selector deletes, and finalizers holding an object
//! in a terminating state.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use kube::ResourceExt;
use serde_json::{Map, Value};

use super::{display_ref, Object, Store};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl Key {
    fn of<K: Object>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    fn same_kind<K: Object>(&self) -> bool {
        self.api_version == K::api_version(&()) && self.kind == K::kind(&())
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    next_version: u64,
    writes: u64,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Thread-safe in-memory object store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn metadata_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.get("metadata").is_some_and(Value::is_object) {
        value["metadata"] = Value::Object(Map::new());
    }
    match value.get_mut("metadata") {
        Some(Value::Object(map)) => map,
        _ => unreachable!("metadata was just set to an object"),
    }
}

fn resource_version(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

/// Everything except metadata and status, used to decide generation bumps
fn desired_part(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "metadata" && k.as_str() != "status")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(target_map) = target {
                for (k, v) in patch_map {
                    if v.is_null() {
                        target_map.remove(k);
                    } else {
                        merge(target_map.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// Supports `key=value`, `key!=value` and bare `key` terms joined by commas
fn matches_selector(value: &Value, selector: &str) -> bool {
    let labels = value.pointer("/metadata/labels").and_then(Value::as_object);
    let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(Value::as_str);

    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, expected)) = term.split_once("!=") {
                label(key.trim()) != Some(expected.trim())
            } else if let Some((key, expected)) = term.split_once('=') {
                label(key.trim()) == Some(expected.trim())
            } else {
                label(term).is_some()
            }
        })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of create, replace and status writes performed through [`Store`]
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Seed or overwrite an object as an external actor would
    pub fn insert<K: Object>(&self, obj: &K) -> Result<()> {
        let key = Key::of::<K>(obj.namespace().as_deref(), &obj.name_any());
        let mut value = serde_json::to_value(obj)?;
        let mut inner = self.lock();
        let version = inner.bump();
        let meta = metadata_mut(&mut value);
        meta.insert("resourceVersion".to_string(), Value::String(version.clone()));
        meta.entry("uid")
            .or_insert_with(|| Value::String(format!("uid-{}", version)));
        meta.entry("generation").or_insert(Value::from(1));
        inner.objects.insert(key, value);
        Ok(())
    }

    /// Fetch an object without going through the async interface
    pub fn fetch<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let inner = self.lock();
        inner
            .objects
            .get(&Key::of::<K>(namespace, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains<K: Object>(&self, namespace: Option<&str>, name: &str) -> bool {
        self.lock()
            .objects
            .contains_key(&Key::of::<K>(namespace, name))
    }

    /// Number of stored objects of a kind
    pub fn count<K: Object>(&self) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.same_kind::<K>())
            .count()
    }

    /// Mutate an object, status included, as an external controller would
    ///
    /// Returns `false` if the object does not exist.
    pub fn update<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        f: impl FnOnce(&mut K),
    ) -> Result<bool> {
        let Some(mut obj) = self.fetch::<K>(namespace, name) else {
            return Ok(false);
        };
        f(&mut obj);
        self.insert(&obj)?;
        Ok(true)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let inner = self.lock();
        inner
            .objects
            .get(&Key::of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::from))
            .transpose()
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let inner = self.lock();
        inner
            .objects
            .iter()
            .filter(|(k, _)| k.same_kind::<K>())
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .filter(|(_, v)| selector.map_or(true, |s| matches_selector(v, s)))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let key = Key::of::<K>(namespace.as_deref(), &name);
        let mut value = serde_json::to_value(obj)?;

        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(Error::Conflict(display_ref::<K>(namespace.as_deref(), &name)));
        }
        let version = inner.bump();
        let meta = metadata_mut(&mut value);
        meta.insert("resourceVersion".to_string(), Value::String(version.clone()));
        meta.insert("uid".to_string(), Value::String(format!("uid-{}", version)));
        meta.insert("generation".to_string(), Value::from(1));
        meta.insert(
            "creationTimestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        inner.writes += 1;
        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let key = Key::of::<K>(namespace.as_deref(), &name);
        let mut value = serde_json::to_value(obj)?;

        let mut inner = self.lock();
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(Error::not_found(K::kind(&()), name));
        };
        if let Some(expected) = resource_version(&value) {
            if Some(expected) != resource_version(&stored) {
                return Err(Error::Conflict(display_ref::<K>(namespace.as_deref(), &name)));
            }
        }

        let generation = stored
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if desired_part(&stored) != desired_part(&value) {
            generation + 1
        } else {
            generation
        };

        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Value::Object(map) = &mut value {
                    map.remove("status");
                }
            }
        }

        let version = inner.bump();
        let meta = metadata_mut(&mut value);
        meta.insert("resourceVersion".to_string(), Value::String(version));
        meta.insert("generation".to_string(), Value::from(generation));
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match stored.pointer(&format!("/metadata/{}", field)) {
                Some(v) => meta.insert(field.to_string(), v.clone()),
                None => meta.remove(field),
            };
        }
        inner.writes += 1;
        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn delete_collection<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<()> {
        let mut inner = self.lock();
        let matching: Vec<Key> = inner
            .objects
            .iter()
            .filter(|(k, _)| k.same_kind::<K>())
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .filter(|(_, v)| matches_selector(v, selector))
            .map(|(k, _)| k.clone())
            .collect();

        for key in matching {
            let has_finalizers = inner.objects.get(&key).is_some_and(|v| {
                v.pointer("/metadata/finalizers")
                    .and_then(Value::as_array)
                    .is_some_and(|f| !f.is_empty())
            });
            if has_finalizers {
                if let Some(value) = inner.objects.get_mut(&key) {
                    metadata_mut(value)
                        .entry("deletionTimestamp")
                        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
                }
            } else {
                inner.objects.remove(&key);
            }
        }
        Ok(())
    }

    async fn patch_status<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: &Value,
    ) -> Result<()> {
        let key = Key::of::<K>(namespace, name);
        let mut inner = self.lock();
        let version = inner.bump();
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(Error::not_found(K::kind(&()), name));
        };
        merge(
            stored
                .as_object_mut()
                .map(|m| m.entry("status").or_insert(Value::Null))
                .ok_or_else(|| Error::config("stored object is not a JSON object"))?,
            status,
        );
        metadata_mut(stored).insert("resourceVersion".to_string(), Value::String(version));
        inner.writes += 1;
        Ok(())
    }
}
