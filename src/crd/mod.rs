//! Custom Resource Definitions for the Snapshot Mover Operator

mod external;
mod status;
mod volume_snapshot_backup;
mod volume_snapshot_restore;

pub use external::*;
pub use status::*;
pub use volume_snapshot_backup::*;
pub use volume_snapshot_restore::*;

use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Direction of a data-movement workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Backup,
    Restore,
}

impl Direction {
    /// Phase reached once the replication engine finished its part
    pub fn done_phase(self) -> Phase {
        match self {
            Direction::Backup => Phase::SnapshotBackupDone,
            Direction::Restore => Phase::SnapshotRestoreDone,
        }
    }

    /// Label carrying the owning workflow's name on every derived resource
    pub fn owner_label(self) -> &'static str {
        match self {
            Direction::Backup => crate::naming::BACKUP_OWNER_LABEL,
            Direction::Restore => crate::naming::RESTORE_OWNER_LABEL,
        }
    }
}

/// A workflow record reconciled by the engine
pub trait Workflow:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const DIRECTION: Direction;

    fn mover_status(&self) -> Option<&MoverStatus>;

    fn protected_namespace(&self) -> &str;
}

impl Workflow for VolumeSnapshotBackup {
    const DIRECTION: Direction = Direction::Backup;

    fn mover_status(&self) -> Option<&MoverStatus> {
        self.status.as_ref()
    }

    fn protected_namespace(&self) -> &str {
        &self.spec.protected_namespace
    }
}

impl Workflow for VolumeSnapshotRestore {
    const DIRECTION: Direction = Direction::Restore;

    fn mover_status(&self) -> Option<&MoverStatus> {
        self.status.as_ref()
    }

    fn protected_namespace(&self) -> &str {
        &self.spec.protected_namespace
    }
}

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&VolumeSnapshotBackup::crd())?,
        serde_yaml::to_string(&VolumeSnapshotRestore::crd())?,
    ])
}
