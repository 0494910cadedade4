//! Desired state of derived resources
//!
//! Each builder is a mutator applied by the synchronizer to either the live
//! object or a blank one. Builders are pure: they read only their arguments
//! and produce the same object for the same inputs. Fields that the
//! Kubernetes API treats as immutable are only set while the object has not
//! been created yet.

pub mod credentials;
pub mod replication;
pub mod snapshot;
pub mod volume;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::Workflow;
use crate::naming;

/// Identity of the workflow that derived resources belong to
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    pub label_key: &'static str,
    pub name: String,
    pub namespace: String,
    /// Set when the workflow has been persisted
    pub reference: Option<OwnerReference>,
}

impl Owner {
    pub fn of<W: Workflow>(workflow: &W) -> Self {
        Self {
            label_key: W::DIRECTION.owner_label(),
            name: workflow.name_any(),
            namespace: workflow.namespace().unwrap_or_default(),
            reference: workflow.controller_owner_ref(&()),
        }
    }

    /// Label selector matching every resource stamped by this owner
    pub fn selector(&self) -> String {
        naming::owner_selector(self.label_key, &self.name, &self.namespace)
    }

    /// Add ownership labels, and an owner reference when the object lives
    /// in the workflow's own namespace
    pub fn stamp(&self, meta: &mut ObjectMeta) {
        meta.labels
            .get_or_insert_with(Default::default)
            .extend(naming::owner_labels(self.label_key, &self.name, &self.namespace));

        let Some(reference) = &self.reference else {
            return;
        };
        if meta.namespace.as_deref() != Some(self.namespace.as_str()) {
            return;
        }
        let refs = meta.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == reference.uid) {
            refs.push(reference.clone());
        }
    }
}

/// Metadata carrying only an identity, used for blank objects
pub fn identity(name: impl Into<String>, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::naming::BACKUP_OWNER_LABEL;

    pub fn owner() -> Owner {
        Owner {
            label_key: BACKUP_OWNER_LABEL,
            name: "foo".to_string(),
            namespace: "apps".to_string(),
            reference: Some(OwnerReference {
                api_version: "datamover.oso.sh/v1alpha1".to_string(),
                kind: "VolumeSnapshotBackup".to_string(),
                name: "foo".to_string(),
                uid: "uid-foo".to_string(),
                controller: Some(true),
                ..Default::default()
            }),
        }
    }
}
