//! Per-workflow repository credentials
//!
//! The base secret in the protected namespace holds restic configuration
//! for the whole installation. Each workflow gets its own copy with the
//! repository rewritten to a path unique to that workflow.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;

use super::Owner;
use crate::error::{Error, Result};

pub const RESTIC_REPOSITORY: &str = "RESTIC_REPOSITORY";
pub const RESTIC_PASSWORD: &str = "RESTIC_PASSWORD";

/// Read a UTF-8 value from a secret's data or string data
pub fn secret_string(secret: &Secret, key: &str) -> Result<String> {
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Ok(value.clone());
    }

    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::build(
                "Secret",
                format!("key {} missing from secret {}", key, secret.name_any()),
            )
        })?;

    String::from_utf8(bytes.0.clone()).map_err(|e| {
        Error::build(
            "Secret",
            format!("invalid UTF-8 in secret key '{}': {}", key, e),
        )
    })
}

/// Configuration copied from the base secret
#[derive(Clone, Debug, PartialEq)]
pub struct RepositoryCredentials {
    /// Repository URL prefix configured for the installation
    pub base_repository: String,
    entries: BTreeMap<String, ByteString>,
}

impl RepositoryCredentials {
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let base_repository = secret_string(secret, RESTIC_REPOSITORY)?;
        secret_string(secret, RESTIC_PASSWORD)?;

        let mut entries = secret.data.clone().unwrap_or_default();
        if let Some(string_data) = &secret.string_data {
            for (k, v) in string_data {
                entries.insert(k.clone(), ByteString(v.clone().into_bytes()));
            }
        }

        Ok(Self {
            base_repository: base_repository.trim_end_matches('/').to_string(),
            entries,
        })
    }
}

/// Repository path for one backup workflow
pub fn backup_repository(base: &str, workflow_namespace: &str, workflow_name: &str) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        workflow_namespace,
        workflow_name
    )
}

/// Copy of the base configuration pointing at `repository`
pub fn credential_secret(
    obj: &mut Secret,
    credentials: &RepositoryCredentials,
    repository: &str,
    owner: &Owner,
) -> Result<()> {
    owner.stamp(&mut obj.metadata);

    let mut data = credentials.entries.clone();
    data.insert(
        RESTIC_REPOSITORY.to_string(),
        ByteString(repository.as_bytes().to_vec()),
    );
    obj.data = Some(data);
    obj.string_data = None;
    obj.type_ = Some("Opaque".to_string());
    Ok(())
}
