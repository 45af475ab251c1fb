//! CredentialProvider CRD
//!
//! A CredentialProvider is a cluster-scoped declaration of an upstream API
//! (OpenAI, Anthropic, Bedrock, ...) and how keygate obtains its master
//! credential. Tenants never edit it; they reference it from a
//! [`CredentialGrant`](super::CredentialGrant).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;
use super::types::Condition;

/// CredentialProvider declares an upstream API and its master credential.
///
/// Example:
/// ```yaml
/// apiVersion: keygate.dev/v1alpha1
/// kind: CredentialProvider
/// metadata:
///   name: openai-prod
/// spec:
///   provider: openai
///   auth:
///     type: apiKey
///     apiKey:
///       secretRef:
///         name: openai-master
///         namespace: keygate-system
///         key: api-key
///       rotation:
///         enabled: true
///         interval: 30d
///   allowedCapabilities: [gpt-4o, gpt-4o-mini]
///   namespaceSelector:
///     matchLabels:
///       keygate.dev/llm-access: enabled
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keygate.dev",
    version = "v1alpha1",
    kind = "CredentialProvider",
    shortname = "cprov",
    status = "CredentialProviderStatus",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Auth Type","type":"string","jsonPath":".spec.auth.type"}"#,
    printcolumn = r#"{"name":"Grants","type":"integer","jsonPath":".status.grantCount"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProviderSpec {
    /// Upstream service this declaration is for
    pub provider: ProviderType,

    /// How the master credential is obtained
    pub auth: AuthConfig,

    /// Capability identifiers (model names, scopes) grants may request.
    /// Empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_capabilities: Vec<String>,

    /// Informational rate limits advertised to consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Namespaces allowed to create grants against this provider.
    /// Absent means every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Endpoint override (proxies, private endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
}

/// Upstream API family
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ProviderType {
    /// OpenAI API
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic API
    #[serde(rename = "anthropic")]
    Anthropic,
    /// AWS Bedrock
    #[serde(rename = "aws-bedrock")]
    AwsBedrock,
    /// Azure OpenAI Service
    #[serde(rename = "azure-openai")]
    AzureOpenAi,
    /// GCP Vertex AI
    #[serde(rename = "gcp-vertexai")]
    GcpVertexAi,
    /// Anything else with an API key
    #[serde(rename = "custom")]
    Custom,
}

impl ProviderType {
    /// Wire name of the provider type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::AwsBedrock => "aws-bedrock",
            Self::AzureOpenAi => "azure-openai",
            Self::GcpVertexAi => "gcp-vertexai",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "aws-bedrock" => Ok(Self::AwsBedrock),
            "azure-openai" => Ok(Self::AzureOpenAi),
            "gcp-vertexai" => Ok(Self::GcpVertexAi),
            "custom" => Ok(Self::Custom),
            _ => Err(crate::Error::validation(format!(
                "invalid provider type: {s}, expected one of: openai, anthropic, aws-bedrock, azure-openai, gcp-vertexai, custom"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication descriptor, tagged by `type`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Which block below is authoritative
    #[serde(rename = "type")]
    pub type_: AuthType,

    /// Required when type is `apiKey`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKeyAuth>,

    /// Required when type is `externalSecret`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_secret: Option<ExternalSecretAuth>,

    /// Required when type is `workloadIdentity`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_identity: Option<WorkloadIdentityAuth>,
}

/// Authentication strategy kind
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
    /// Copy an API key held in a platform-controlled Secret
    ApiKey,
    /// Delegate to External Secrets Operator
    ExternalSecret,
    /// Cloud workload identity federation (declared only)
    WorkloadIdentity,
}

impl AuthType {
    /// Wire name of the auth type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "apiKey",
            Self::ExternalSecret => "externalSecret",
            Self::WorkloadIdentity => "workloadIdentity",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direct API key configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAuth {
    /// Master Secret holding the key
    pub secret_ref: SecretKeyReference,

    /// Rotation policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationConfig>,
}

/// Reference to one key of a Secret in a named namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeyReference {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
    /// Key within the Secret's data
    pub key: String,
}

/// Rotation policy for direct API keys
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationConfig {
    /// Whether automatic rotation is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Interval between rotations (e.g., "30d", "7d")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// How rotation is performed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RotationStrategy>,
}

/// Rotation mechanism
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RotationStrategy {
    /// Ask the upstream API for a fresh key
    #[default]
    #[serde(rename = "providerAPI")]
    ProviderApi,
    /// Recreate the artifact from the master Secret
    RecreateSecret,
}

/// External Secrets Operator configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretAuth {
    /// SecretStore or ClusterSecretStore to pull from
    pub store: StoreReference,

    /// Location of the credential in the external store
    pub remote_ref: RemoteReference,

    /// How often ESO refreshes the value (e.g., "1h")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
}

/// Reference to an ESO store
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct StoreReference {
    /// Store name
    pub name: String,
    /// Store kind
    pub kind: StoreKind,
}

/// ESO store kinds
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StoreKind {
    /// Namespaced SecretStore
    SecretStore,
    /// Cluster-wide ClusterSecretStore
    ClusterSecretStore,
}

impl StoreKind {
    /// Kind name as ESO expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretStore => "SecretStore",
            Self::ClusterSecretStore => "ClusterSecretStore",
        }
    }
}

/// Location of a value in an external store
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RemoteReference {
    /// Key/path in the store
    pub key: String,
    /// Property within the stored object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Specific version of the stored value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Cloud workload identity configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentityAuth {
    /// AWS IRSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsWorkloadIdentity>,
    /// Azure Workload Identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureWorkloadIdentity>,
    /// GCP Workload Identity Federation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpWorkloadIdentity>,
}

/// AWS IRSA role
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsWorkloadIdentity {
    /// IAM role ARN to assume
    pub role_arn: String,
    /// AWS region
    pub region: String,
}

/// Azure AD workload identity
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureWorkloadIdentity {
    /// Application client ID
    pub client_id: String,
    /// Tenant ID
    pub tenant_id: String,
    /// User-assigned managed identity resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_identity_resource_id: Option<String>,
}

/// GCP service account binding
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcpWorkloadIdentity {
    /// Service account email
    pub service_account_email: String,
    /// Project ID
    pub project_id: String,
}

/// Informational rate limits
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Max requests per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u64>,
    /// Max tokens per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u64>,
}

/// Endpoint override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Base URL for the provider API; empty means provider default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// CredentialProvider status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProviderStatus {
    /// Current conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last time the master credential configuration was checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_credential_check: Option<DateTime<Utc>>,

    /// Number of CredentialGrants referencing this provider
    #[serde(default)]
    pub grant_count: i32,
}

/// Reasons recorded on a provider's `Ready` condition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderReason {
    /// Master Secret exists and holds the declared key
    SecretFound,
    /// Master Secret does not exist
    SecretNotFound,
    /// Master Secret could not be read
    SecretGetError,
    /// Master Secret lacks the declared key
    SecretKeyMissing,
    /// Auth block missing or incomplete
    InvalidConfig,
    /// ESO store and remote reference are declared
    ExternalSecretConfigured,
    /// Workload identity is accepted without verification
    WorkloadIdentityNotValidated,
}

impl ProviderReason {
    /// Reason string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretFound => "SecretFound",
            Self::SecretNotFound => "SecretNotFound",
            Self::SecretGetError => "SecretGetError",
            Self::SecretKeyMissing => "SecretKeyMissing",
            Self::InvalidConfig => "InvalidConfig",
            Self::ExternalSecretConfigured => "ExternalSecretConfigured",
            Self::WorkloadIdentityNotValidated => "WorkloadIdentityNotValidated",
        }
    }
}

impl std::fmt::Display for ProviderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CredentialProviderSpec {
    /// Base URL override, if one is declared and non-empty
    pub fn base_url(&self) -> Option<&str> {
        self.endpoint
            .as_ref()
            .and_then(|e| e.base_url.as_deref())
            .filter(|u| !u.is_empty())
    }

    /// Whether a namespace with these labels may hold grants for this provider
    pub fn admits_namespace(&self, namespace_labels: &BTreeMap<String, String>) -> bool {
        match &self.namespace_selector {
            None => true,
            Some(selector) => selector.validate().is_ok() && selector.matches(namespace_labels),
        }
    }

    /// Requested capabilities missing from the allow-list (empty allow-list admits all)
    pub fn disallowed_capabilities<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        if self.allowed_capabilities.is_empty() {
            return vec![];
        }
        requested
            .iter()
            .filter(|c| !self.allowed_capabilities.contains(c))
            .map(String::as_str)
            .collect()
    }

    /// Declared rotation interval for direct API keys, when rotation is enabled
    pub fn rotation_interval(&self) -> Option<&str> {
        self.auth
            .api_key
            .as_ref()
            .and_then(|a| a.rotation.as_ref())
            .filter(|r| r.enabled)
            .and_then(|r| r.interval.as_deref())
            .filter(|i| !i.is_empty())
    }

    /// Whether rotation is switched on for the direct API key
    pub fn rotation_enabled(&self) -> bool {
        self.auth
            .api_key
            .as_ref()
            .and_then(|a| a.rotation.as_ref())
            .is_some_and(|r| r.enabled)
    }
}
