//! ESO `external-secrets.io/v1beta1` ExternalSecret
//!
//! Typed structs for the subset of the ExternalSecret schema keygate writes,
//! plus the adapter translating [`SyncRequest`]s into them.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use keygate_common::kube_utils::HasApiResource;

use super::{
    ExternalStoreAdapter, SyncRequest, SyncStatus, MSG_NO_CONDITIONS, MSG_NO_READY_CONDITION,
};
use crate::ProvisionError;

/// `external-secrets.io/v1beta1` ExternalSecret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecret {
    /// API version
    #[serde(default = "ExternalSecret::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "ExternalSecret::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ExternalSecretMetadata,
    /// ExternalSecret spec
    pub spec: ExternalSecretSpec,
}

impl HasApiResource for ExternalSecret {
    const API_VERSION: &'static str = "external-secrets.io/v1beta1";
    const KIND: &'static str = "ExternalSecret";
}

impl ExternalSecret {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// ExternalSecret with `apiVersion`/`kind` filled in
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        labels: BTreeMap<String, String>,
        spec: ExternalSecretSpec,
    ) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ExternalSecretMetadata {
                name: name.into(),
                namespace: namespace.into(),
                labels,
            },
            spec,
        }
    }
}

/// Object metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExternalSecretMetadata {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// ExternalSecret spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    /// Go duration between syncs, e.g. `1h`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
    /// Backing store
    pub secret_store_ref: SecretStoreRef,
    /// Secret ESO writes
    pub target: ExternalSecretTarget,
    /// Remote values to copy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<ExternalSecretData>,
}

/// Store the values are read from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecretStoreRef {
    /// Name of the store
    pub name: String,
    /// "SecretStore" or "ClusterSecretStore"
    pub kind: String,
}

/// Secret ESO writes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretTarget {
    /// Target Secret name
    pub name: String,
    /// `Owner`, `Orphan`, `Merge` or `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_policy: Option<String>,
}

/// One remote value copied into the target Secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretData {
    /// Data key in the target Secret
    pub secret_key: String,
    /// Where the value lives remotely
    pub remote_ref: RemoteRef,
}

/// Remote key, property and version
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteRef {
    /// Path/key in the external secret store
    pub key: String,
    /// Specific property within the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Specific version of the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Adapter for ESO's v1beta1 API
#[derive(Clone, Copy, Debug, Default)]
pub struct EsoV1Beta1Adapter;

impl EsoV1Beta1Adapter {
    fn to_external_secret(
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        request: &SyncRequest,
    ) -> ExternalSecret {
        let spec = ExternalSecretSpec {
            refresh_interval: Some(request.refresh_interval.clone()),
            secret_store_ref: SecretStoreRef {
                name: request.store.name.clone(),
                kind: request.store.kind.as_str().to_string(),
            },
            target: ExternalSecretTarget {
                name: request.target.name.clone(),
                creation_policy: Some(request.target.creation_policy.as_str().to_string()),
            },
            data: request
                .data
                .iter()
                .map(|d| ExternalSecretData {
                    secret_key: d.secret_key.clone(),
                    remote_ref: RemoteRef {
                        key: d.remote_key.clone(),
                        property: d.property.clone().filter(|p| !p.is_empty()),
                        version: d.version.clone().filter(|v| !v.is_empty()),
                    },
                })
                .collect(),
        };
        ExternalSecret::new(name, namespace, labels.clone(), spec)
    }
}

impl ExternalStoreAdapter for EsoV1Beta1Adapter {
    fn api_resource(&self) -> ApiResource {
        ExternalSecret::api_resource()
    }

    fn build(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        request: &SyncRequest,
    ) -> Result<DynamicObject, ProvisionError> {
        let es = Self::to_external_secret(namespace, name, labels, request);
        let value = serde_json::to_value(&es).map_err(|e| {
            ProvisionError::Serialization(format!("ExternalSecret {namespace}/{name}: {e}"))
        })?;
        serde_json::from_value(value).map_err(|e| {
            ProvisionError::Serialization(format!("ExternalSecret {namespace}/{name}: {e}"))
        })
    }

    fn parse_sync_status(&self, object: &DynamicObject) -> SyncStatus {
        let conditions = match object.data["status"]["conditions"].as_array() {
            Some(c) if !c.is_empty() => c,
            _ => return SyncStatus::pending(MSG_NO_CONDITIONS),
        };

        let ready = conditions
            .iter()
            .find(|c| c["type"].as_str() == Some("Ready"));

        match ready {
            Some(cond) => {
                let message = non_empty(&cond["message"])
                    .or_else(|| non_empty(&cond["reason"]))
                    .unwrap_or("no message")
                    .to_string();
                SyncStatus {
                    ready: cond["status"].as_str() == Some("True"),
                    message,
                }
            }
            None => SyncStatus::pending(MSG_NO_READY_CONDITION),
        }
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eso::{CreationPolicy, SyncData, SyncStore, SyncTarget};
    use keygate_common::crd::StoreKind;
    use serde_json::json;

    fn request() -> SyncRequest {
        SyncRequest {
            refresh_interval: "6h".to_string(),
            store: SyncStore {
                name: "vault-backend".to_string(),
                kind: StoreKind::ClusterSecretStore,
            },
            target: SyncTarget {
                name: "chatbot-key".to_string(),
                creation_policy: CreationPolicy::Owner,
            },
            data: vec![SyncData {
                secret_key: "apiKey".to_string(),
                remote_key: "llm/openai".to_string(),
                property: Some("api_key".to_string()),
                version: None,
            }],
        }
    }

    fn object_with_status(status: serde_json::Value) -> DynamicObject {
        let mut obj = DynamicObject::new("chatbot-key", &ExternalSecret::api_resource());
        obj.data = json!({ "spec": {}, "status": status });
        obj
    }

    #[test]
    fn api_resource_targets_v1beta1() {
        let ar = EsoV1Beta1Adapter.api_resource();
        assert_eq!(ar.api_version, "external-secrets.io/v1beta1");
        assert_eq!(ar.kind, "ExternalSecret");
        assert_eq!(ar.plural, "externalsecrets");
    }

    #[test]
    fn build_translates_sync_request() {
        let mut labels = BTreeMap::new();
        labels.insert("keygate.dev/grant".to_string(), "chatbot".to_string());

        let obj = EsoV1Beta1Adapter
            .build("team-a", "chatbot-key", &labels, &request())
            .unwrap();

        assert_eq!(obj.metadata.name.as_deref(), Some("chatbot-key"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(
            obj.metadata.labels.as_ref().and_then(|l| l.get("keygate.dev/grant")),
            Some(&"chatbot".to_string())
        );
        let types = obj.types.as_ref().unwrap();
        assert_eq!(types.api_version, "external-secrets.io/v1beta1");
        assert_eq!(types.kind, "ExternalSecret");

        let spec = &obj.data["spec"];
        assert_eq!(spec["refreshInterval"], "6h");
        assert_eq!(spec["secretStoreRef"]["name"], "vault-backend");
        assert_eq!(spec["secretStoreRef"]["kind"], "ClusterSecretStore");
        assert_eq!(spec["target"]["name"], "chatbot-key");
        assert_eq!(spec["target"]["creationPolicy"], "Owner");
        assert_eq!(spec["data"][0]["secretKey"], "apiKey");
        assert_eq!(spec["data"][0]["remoteRef"]["key"], "llm/openai");
        assert_eq!(spec["data"][0]["remoteRef"]["property"], "api_key");
        assert!(spec["data"][0]["remoteRef"].get("version").is_none());
    }

    #[test]
    fn build_drops_empty_property_and_keeps_version() {
        let mut req = request();
        req.data[0].property = Some(String::new());
        req.data[0].version = Some("3".to_string());
        let obj = EsoV1Beta1Adapter
            .build("team-a", "chatbot-key", &BTreeMap::new(), &req)
            .unwrap();
        let remote = &obj.data["spec"]["data"][0]["remoteRef"];
        assert!(remote.get("property").is_none());
        assert_eq!(remote["version"], "3");
    }

    #[test]
    fn parse_status_without_status_block() {
        let mut obj = DynamicObject::new("x", &ExternalSecret::api_resource());
        obj.data = json!({ "spec": {} });
        let status = EsoV1Beta1Adapter.parse_sync_status(&obj);
        assert!(!status.ready);
        assert_eq!(status.message, MSG_NO_CONDITIONS);
    }

    #[test]
    fn parse_status_with_empty_conditions() {
        let status = EsoV1Beta1Adapter.parse_sync_status(&object_with_status(json!({
            "conditions": []
        })));
        assert_eq!(status, SyncStatus::pending(MSG_NO_CONDITIONS));
    }

    #[test]
    fn parse_status_without_ready_condition() {
        let status = EsoV1Beta1Adapter.parse_sync_status(&object_with_status(json!({
            "conditions": [{"type": "Deleted", "status": "False"}]
        })));
        assert_eq!(status, SyncStatus::pending(MSG_NO_READY_CONDITION));
    }

    #[test]
    fn parse_status_ready_true() {
        let status = EsoV1Beta1Adapter.parse_sync_status(&object_with_status(json!({
            "conditions": [{
                "type": "Ready",
                "status": "True",
                "reason": "SecretSynced",
                "message": "Secret was synced"
            }]
        })));
        assert!(status.ready);
        assert_eq!(status.message, "Secret was synced");
    }

    #[test]
    fn parse_status_ready_false_falls_back_to_reason() {
        let status = EsoV1Beta1Adapter.parse_sync_status(&object_with_status(json!({
            "conditions": [{
                "type": "Ready",
                "status": "False",
                "reason": "SecretSyncedError",
                "message": ""
            }]
        })));
        assert!(!status.ready);
        assert_eq!(status.message, "SecretSyncedError");
    }

    #[test]
    fn typed_external_secret_parses_from_json() {
        let es: ExternalSecret = serde_json::from_value(json!({
            "metadata": {"name": "n", "namespace": "ns"},
            "spec": {
                "secretStoreRef": {"name": "s", "kind": "SecretStore"},
                "target": {"name": "n"}
            }
        }))
        .unwrap();
        assert_eq!(es.api_version, "external-secrets.io/v1beta1");
        assert_eq!(es.kind, "ExternalSecret");
        assert!(es.spec.data.is_empty());
        assert!(es.spec.target.creation_policy.is_none());
    }
}
