//! Deterministic names and labels for derived resources
//!
//! Every derived resource name is a pure function of the workflow name or the
//! source snapshot name, so re-deriving a name always finds the same object.

use std::collections::BTreeMap;

/// Ownership label for resources derived from a VolumeSnapshotBackup
pub const BACKUP_OWNER_LABEL: &str = "datamover.oso.sh/vsb-name";

/// Ownership label for resources derived from a VolumeSnapshotRestore
pub const RESTORE_OWNER_LABEL: &str = "datamover.oso.sh/vsr-name";

/// Namespace of the owning workflow record
pub const OWNER_NAMESPACE_LABEL: &str = "datamover.oso.sh/owner-namespace";

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "snapshot-mover-operator";

pub fn volume_claim(snapshot_name: &str) -> String {
    format!("{}-pvc", snapshot_name)
}

pub fn cloned_snapshot(snapshot_name: &str) -> String {
    format!("{}-volumesnapshot", snapshot_name)
}

pub fn cloned_content(snapshot_name: &str) -> String {
    format!("{}-clone", snapshot_name)
}

pub fn binding_pod(snapshot_name: &str) -> String {
    format!("{}-pod", snapshot_name)
}

pub fn credential_secret(volume_claim_name: &str) -> String {
    format!("{}-secret", volume_claim_name)
}

pub fn replication_source(workflow_name: &str) -> String {
    format!("{}-rep-src", workflow_name)
}

pub fn replication_destination(workflow_name: &str) -> String {
    format!("{}-rep-dest", workflow_name)
}

/// Labels stamped on every derived resource
pub fn owner_labels(
    owner_label: &str,
    workflow_name: &str,
    workflow_namespace: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (owner_label.to_string(), workflow_name.to_string()),
        (
            OWNER_NAMESPACE_LABEL.to_string(),
            workflow_namespace.to_string(),
        ),
    ])
}

/// Label selector matching every resource derived from one workflow
///
/// Workflows with the same name in different namespaces share the protected
/// namespace, so the owner's namespace is part of the selector.
pub fn owner_selector(owner_label: &str, workflow_name: &str, workflow_namespace: &str) -> String {
    format!(
        "{}={},{}={}",
        owner_label, workflow_name, OWNER_NAMESPACE_LABEL, workflow_namespace
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names_are_deterministic() {
        assert_eq!(volume_claim("snap1"), "snap1-pvc");
        assert_eq!(volume_claim("snap1"), volume_claim("snap1"));
        assert_eq!(cloned_snapshot("snap1"), "snap1-volumesnapshot");
        assert_eq!(cloned_content("snap1"), "snap1-clone");
        assert_eq!(binding_pod("snap1"), "snap1-pod");
        assert_eq!(credential_secret("snap1-pvc"), "snap1-pvc-secret");
        assert_eq!(replication_source("foo"), "foo-rep-src");
        assert_eq!(replication_destination("foo"), "foo-rep-dest");
    }

    #[test]
    fn owner_labels_and_selector_agree() {
        let labels = owner_labels(BACKUP_OWNER_LABEL, "foo", "apps");
        assert_eq!(labels.get(BACKUP_OWNER_LABEL).map(String::as_str), Some("foo"));
        assert_eq!(
            labels.get(OWNER_NAMESPACE_LABEL).map(String::as_str),
            Some("apps")
        );
        assert_eq!(
            owner_selector(BACKUP_OWNER_LABEL, "foo", "apps"),
            "datamover.oso.sh/vsb-name=foo,datamover.oso.sh/owner-namespace=apps"
        );
    }
}
