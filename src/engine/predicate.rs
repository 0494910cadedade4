//! Event filtering for watch streams
//!
//! Changes to the workflow type itself only matter on create, delete, and
//! spec changes (a generation bump). Changes to any other type only matter
//! when the object carries the workflow's ownership label.

use std::collections::HashMap;
use std::sync::Mutex;

use kube::runtime::watcher;
use kube::{Resource, ResourceExt};

/// Group, version and kind of a watched type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TypeDescriptor {
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        }
    }
}

/// A classified change notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Create,
    Update { old_generation: Option<i64> },
    Delete,
}

/// Decides which change notifications trigger a reconciliation
pub struct OwnershipPredicate {
    owner_type: TypeDescriptor,
    label_key: &'static str,
    generations: Mutex<HashMap<String, Option<i64>>>,
}

impl OwnershipPredicate {
    pub fn new(owner_type: TypeDescriptor, label_key: &'static str) -> Self {
        Self {
            owner_type,
            label_key,
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a change to `obj` should trigger a reconciliation
    pub fn accepts<K: Resource<DynamicType = ()>>(&self, change: Change, obj: &K) -> bool {
        if TypeDescriptor::of::<K>() == self.owner_type {
            return match change {
                Change::Create | Change::Delete => true,
                Change::Update { old_generation } => old_generation != obj.meta().generation,
            };
        }

        obj.labels()
            .get(self.label_key)
            .is_some_and(|owner| !owner.is_empty())
    }

    /// Classify a watcher event and return the object if it is accepted
    ///
    /// The watcher reports creates and updates alike as `Apply`, so the last
    /// generation seen per workflow record is remembered to tell them apart.
    pub fn admit<K: Resource<DynamicType = ()>>(&self, event: watcher::Event<K>) -> Option<K> {
        let is_owner = TypeDescriptor::of::<K>() == self.owner_type;
        let (change, obj) = match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                let change = if is_owner {
                    self.observe(&obj)
                } else {
                    Change::Update {
                        old_generation: None,
                    }
                };
                (change, obj)
            }
            watcher::Event::Delete(obj) => {
                if is_owner {
                    self.forget(&obj);
                }
                (Change::Delete, obj)
            }
            watcher::Event::Init | watcher::Event::InitDone => return None,
        };

        self.accepts(change, &obj).then_some(obj)
    }

    fn key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
        obj.uid().unwrap_or_else(|| {
            format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
        })
    }

    fn observe<K: Resource<DynamicType = ()>>(&self, obj: &K) -> Change {
        let mut seen = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        match seen.insert(Self::key(obj), obj.meta().generation) {
            None => Change::Create,
            Some(old_generation) => Change::Update { old_generation },
        }
    }

    fn forget<K: Resource<DynamicType = ()>>(&self, obj: &K) {
        let mut seen = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        seen.remove(&Self::key(obj));
    }
}
