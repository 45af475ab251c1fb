//! CredentialGrant CRD
//!
//! A CredentialGrant is a tenant's namespaced request for a scoped credential
//! derived from a [`CredentialProvider`](super::CredentialProvider). The
//! controller materializes it as a Secret owned by the grant, and the pod
//! webhook wires that Secret into matching workloads.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;
use super::types::{find_condition, Condition, ConditionStatus};

/// CredentialGrant requests a derived credential for workloads in one namespace.
///
/// Example:
/// ```yaml
/// apiVersion: keygate.dev/v1alpha1
/// kind: CredentialGrant
/// metadata:
///   name: chatbot-openai
///   namespace: team-a
/// spec:
///   providerRef:
///     name: openai-prod
///   capabilities: [gpt-4o]
///   secretName: chatbot-openai-key
///   workloadSelector:
///     matchLabels:
///       app: chatbot
///   injection:
///     env:
///       - name: OPENAI_API_KEY
///         secretKey: apiKey
///   rotation:
///     interval: 7d
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keygate.dev",
    version = "v1alpha1",
    kind = "CredentialGrant",
    namespaced,
    shortname = "cgrant",
    status = "CredentialGrantStatus",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.providerRef.name"}"#,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".spec.secretName"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Last Rotation","type":"date","jsonPath":".status.lastRotation"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CredentialGrantSpec {
    /// Provider this grant draws from
    pub provider_ref: ProviderReference,

    /// Requested capability identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    /// Name of the Secret to materialize in the grant's namespace
    pub secret_name: String,

    /// Pods to inject into; absent means the credential is never injected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<LabelSelector>,

    /// How the credential is exposed to matching pods
    #[serde(default)]
    pub injection: InjectionConfig,

    /// Rotation override; takes precedence over the provider's interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<GrantRotation>,
}

/// Reference to a cluster-scoped CredentialProvider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProviderReference {
    /// Provider name
    pub name: String,
}

/// Exposure of artifact keys inside pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InjectionConfig {
    /// Environment variables sourced from artifact keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarMapping>,

    /// Mount the whole artifact as files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeMapping>,
}

/// Environment variable mapped to an artifact key
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarMapping {
    /// Variable name inside the container
    pub name: String,
    /// Key in the artifact Secret
    pub secret_key: String,
}

/// Volume mount of the artifact
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMapping {
    /// Absolute mount path inside each container
    pub mount_path: String,
    /// Mount read-only (default true)
    #[serde(default = "default_read_only")]
    pub read_only: bool,
}

fn default_read_only() -> bool {
    true
}

/// Grant-level rotation override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct GrantRotation {
    /// Interval between rotations (e.g., "6h")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Reference to the materialized artifact
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArtifactReference {
    /// Always "Secret"
    pub kind: String,
    /// Artifact namespace
    pub namespace: String,
    /// Artifact name
    pub name: String,
}

/// CredentialGrant status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialGrantStatus {
    /// Current conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Materialized artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ArtifactReference>,

    /// When the artifact was last provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation: Option<DateTime<Utc>>,

    /// When the next rotation is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_rotation: Option<DateTime<Utc>>,

    /// Capabilities actually granted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granted_capabilities: Vec<String>,
}

impl CredentialGrantSpec {
    /// Grant-level rotation interval string, if set and non-empty
    pub fn rotation_interval(&self) -> Option<&str> {
        self.rotation
            .as_ref()
            .and_then(|r| r.interval.as_deref())
            .filter(|i| !i.is_empty())
    }
}

/// Condition types a CredentialGrant can carry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrantConditionType {
    /// Overall readiness
    Ready,
    /// Artifact exists and is current
    CredentialProvisioned,
}

impl GrantConditionType {
    /// Every condition type a grant can reach
    pub const ALL: [GrantConditionType; 2] = [Self::Ready, Self::CredentialProvisioned];

    /// Condition type string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::CredentialProvisioned => "CredentialProvisioned",
        }
    }
}

impl std::fmt::Display for GrantConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons recorded on grant conditions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrantReason {
    /// Referenced provider does not exist
    DeclarationNotFound,
    /// Grant namespace fails the provider's namespace selector
    NamespaceNotAllowed,
    /// A requested capability is not on the provider's allow-list
    CapabilityNotAllowed,
    /// Provider auth type has no provisioning strategy
    StrategyUnsupported,
    /// Strategy failed to produce the artifact
    ProvisioningFailed,
    /// Artifact produced
    ArtifactProvisioned,
    /// Grant fully usable
    CredentialReady,
}

impl GrantReason {
    /// Every reason a grant condition can carry
    pub const ALL: [GrantReason; 7] = [
        Self::DeclarationNotFound,
        Self::NamespaceNotAllowed,
        Self::CapabilityNotAllowed,
        Self::StrategyUnsupported,
        Self::ProvisioningFailed,
        Self::ArtifactProvisioned,
        Self::CredentialReady,
    ];

    /// Reason string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeclarationNotFound => "DeclarationNotFound",
            Self::NamespaceNotAllowed => "NamespaceNotAllowed",
            Self::CapabilityNotAllowed => "CapabilityNotAllowed",
            Self::StrategyUnsupported => "StrategyUnsupported",
            Self::ProvisioningFailed => "ProvisioningFailed",
            Self::ArtifactProvisioned => "ArtifactProvisioned",
            Self::CredentialReady => "CredentialReady",
        }
    }

    /// Rejections that only an external edit can clear
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NamespaceNotAllowed | Self::CapabilityNotAllowed)
    }

    fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl std::fmt::Display for GrantReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a grant, inferred from its conditions
///
/// Validating and Provisioning only exist inside a reconcile pass and are
/// never observable from stored status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantState {
    /// Nothing recorded yet
    Pending,
    /// Rejected by policy; waits for an edit
    RejectedPermanent,
    /// Blocked on something that may appear (provider, strategy support)
    Waiting,
    /// Artifact could not be produced
    Degraded,
    /// Artifact provisioned and usable
    Ready,
    /// Deletion in progress
    Terminating,
}

impl CredentialGrant {
    /// Infer the lifecycle state from deletion timestamp and conditions
    pub fn state(&self) -> GrantState {
        if self.metadata.deletion_timestamp.is_some() {
            return GrantState::Terminating;
        }
        let conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        GrantState::from_conditions(conditions)
    }
}

impl GrantState {
    /// Infer state from a grant's conditions
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        if conditions.is_empty() {
            return Self::Pending;
        }

        // Ready carries the latest outcome; CredentialProvisioned can be stale
        match find_condition(conditions, GrantConditionType::Ready.as_str()) {
            Some(c) if c.status == ConditionStatus::True => Self::Ready,
            Some(c) => match GrantReason::from_str_opt(&c.reason) {
                Some(r) if r.is_permanent() => Self::RejectedPermanent,
                Some(GrantReason::ProvisioningFailed) => Self::Degraded,
                _ => Self::Waiting,
            },
            None => {
                let provisioned =
                    find_condition(conditions, GrantConditionType::CredentialProvisioned.as_str());
                if provisioned.is_some_and(|c| c.status == ConditionStatus::False) {
                    Self::Degraded
                } else {
                    Self::Pending
                }
            }
        }
    }
}
