//! External-store adapter
//!
//! The delegated-sync strategy never touches ESO's schema directly. It builds
//! a [`SyncRequest`] and hands it to an [`ExternalStoreAdapter`], which is the
//! only code that knows the concrete `ExternalSecret` shape for one ESO API
//! version. Supporting a new ESO version means adding another adapter.

mod v1beta1;

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use keygate_common::crd::StoreKind;

pub use v1beta1::{
    EsoV1Beta1Adapter, ExternalSecret, ExternalSecretData, ExternalSecretSpec,
    ExternalSecretTarget, RemoteRef, SecretStoreRef,
};

use crate::ProvisionError;

/// Fallback message when the downstream object has no status conditions
pub const MSG_NO_CONDITIONS: &str = "no status conditions yet; ESO may still be syncing";

/// Fallback message when conditions exist but none is `Ready`
pub const MSG_NO_READY_CONDITION: &str = "Ready condition not found in ExternalSecret status";

/// Version-agnostic description of a sync
#[derive(Clone, Debug, PartialEq)]
pub struct SyncRequest {
    /// Downstream refresh schedule (ESO duration syntax, e.g. "1h")
    pub refresh_interval: String,
    /// Store the value is pulled from
    pub store: SyncStore,
    /// Artifact the downstream system writes
    pub target: SyncTarget,
    /// Key mappings
    pub data: Vec<SyncData>,
}

/// Store reference
#[derive(Clone, Debug, PartialEq)]
pub struct SyncStore {
    /// Store name
    pub name: String,
    /// Store kind
    pub kind: StoreKind,
}

/// Target artifact
#[derive(Clone, Debug, PartialEq)]
pub struct SyncTarget {
    /// Secret name to materialize
    pub name: String,
    /// Who owns the materialized Secret
    pub creation_policy: CreationPolicy,
}

/// One exposed key sourced from one remote key
#[derive(Clone, Debug, PartialEq)]
pub struct SyncData {
    /// Key in the materialized Secret
    pub secret_key: String,
    /// Key/path in the store
    pub remote_key: String,
    /// Property within the stored object
    pub property: Option<String>,
    /// Version of the stored value
    pub version: Option<String>,
}

/// Ownership policy for the materialized Secret
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CreationPolicy {
    /// The sync object owns the Secret (deleted with it)
    #[default]
    Owner,
    /// Secret is left behind when the sync object goes away
    Orphan,
    /// Merge into an existing Secret
    Merge,
    /// Do not create a Secret
    None,
}

impl CreationPolicy {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Orphan => "Orphan",
            Self::Merge => "Merge",
            Self::None => "None",
        }
    }
}

/// Normalized downstream readiness
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether the downstream system reports the Secret as synced
    pub ready: bool,
    /// Human-readable explanation; never empty
    pub message: String,
}

impl SyncStatus {
    /// Not-ready status with an explanation
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: message.into(),
        }
    }
}

/// Translation between [`SyncRequest`] and one downstream API version
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ExternalStoreAdapter: Send + Sync {
    /// Type this adapter targets
    fn api_resource(&self) -> ApiResource;

    /// Build the downstream resource for `request`
    fn build(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        request: &SyncRequest,
    ) -> Result<DynamicObject, ProvisionError>;

    /// Read readiness out of a downstream resource
    fn parse_sync_status(&self, object: &DynamicObject) -> SyncStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_policy_wire_values() {
        assert_eq!(CreationPolicy::default(), CreationPolicy::Owner);
        let values: Vec<_> = [
            CreationPolicy::Owner,
            CreationPolicy::Orphan,
            CreationPolicy::Merge,
            CreationPolicy::None,
        ]
        .iter()
        .map(CreationPolicy::as_str)
        .collect();
        assert_eq!(values, vec!["Owner", "Orphan", "Merge", "None"]);
    }

    #[test]
    fn pending_status_is_not_ready() {
        let status = SyncStatus::pending("waiting");
        assert!(!status.ready);
        assert_eq!(status.message, "waiting");
    }
}
