//! Credential provisioning for keygate
//!
//! A [`Strategy`] turns a (CredentialProvider, CredentialGrant) pair into a
//! namespaced Secret the grant owns. Two strategies exist:
//!
//! - [`DirectCopy`]: copy the master API key into the grant's namespace
//! - [`DelegatedSync`]: write an ESO `ExternalSecret` and let ESO sync it
//!
//! All Kubernetes access goes through [`ProvisionClient`] so strategies can be
//! exercised against mocks.

#![deny(missing_docs)]

pub mod delegated_sync;
pub mod direct_copy;
pub mod eso;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use keygate_common::crd::{AuthType, CredentialGrant, CredentialProvider};
use keygate_common::kube_utils::{controller_owner_ref, is_not_found};
use keygate_common::{artifact_labels, FIELD_MANAGER};

pub use delegated_sync::DelegatedSync;
pub use direct_copy::DirectCopy;
pub use eso::{EsoV1Beta1Adapter, ExternalStoreAdapter, SyncRequest, SyncStatus};

/// Artifact age after which a rotation-enabled direct copy reports `needs_rotation`
pub const ROTATION_CHECK_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Artifact age after which the health check warns about rotation
pub const ROTATION_WARNING_AGE: Duration = Duration::from_secs(25 * 24 * 60 * 60);

/// Errors produced by provisioning strategies
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The master Secret named by the provider does not exist
    #[error("source secret {namespace}/{name} not found")]
    SourceSecretNotFound {
        /// Namespace of the master Secret
        namespace: String,
        /// Name of the master Secret
        name: String,
    },

    /// The master Secret exists but lacks the declared key
    #[error("key '{key}' not found in source secret {namespace}/{name}")]
    SourceKeyMissing {
        /// Namespace of the master Secret
        namespace: String,
        /// Name of the master Secret
        name: String,
        /// Missing key
        key: String,
    },

    /// The provider's auth block for its declared type is absent
    #[error("provider {0} is missing its auth configuration")]
    MissingConfig(String),

    /// Kubernetes API call failed
    #[error("{context}: {source}")]
    Kube {
        /// What was being attempted, including the artifact and namespace
        context: String,
        /// Underlying error
        #[source]
        source: kube::Error,
    },

    /// Building a resource failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Grant is not in a state that can be provisioned
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProvisionError {
    /// Wrap a kube error with the attempted operation
    pub fn kube(context: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying without a spec change can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SourceSecretNotFound { .. } | Self::SourceKeyMissing { .. } => true,
            Self::MissingConfig(_) | Self::Serialization(_) => false,
            Self::Kube { source, .. } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409)
            }
            Self::Internal(_) => true,
        }
    }
}

impl From<ProvisionError> for keygate_common::Error {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::Kube { source, .. } => keygate_common::Error::Kube { source },
            ProvisionError::MissingConfig(ref provider) => {
                keygate_common::Error::validation_for(provider.clone(), e.to_string())
            }
            ProvisionError::Serialization(msg) => keygate_common::Error::serialization(msg),
            other => {
                let retryable = other.is_retryable();
                keygate_common::Error::Provisioning {
                    grant: String::new(),
                    message: other.to_string(),
                    retryable,
                }
            }
        }
    }
}

/// Kubernetes operations needed by the strategies
///
/// Deletes return `Ok(false)` when the object was already gone.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ProvisionClient: Send + Sync {
    /// Get a Secret, `None` if absent
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    /// Server-side apply a Secret with the keygate field manager
    async fn apply_secret(&self, namespace: &str, name: &str, secret: &Secret)
        -> Result<(), kube::Error>;

    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, kube::Error>;

    /// Get a dynamic object, `None` if absent
    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, kube::Error>;

    /// Server-side apply a dynamic object, returning the stored object
    async fn apply_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error>;

    /// Delete a dynamic object
    async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, kube::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeProvisionClient {
    client: Client,
}

impl KubeProvisionClient {
    /// Create a new KubeProvisionClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProvisionClient for KubeProvisionClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<(), kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(secret),
        )
        .await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, kube::Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        api.get_opt(name).await
    }

    async fn apply_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(object),
        )
        .await
    }

    async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, kube::Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Outcome of a successful provision
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionResult {
    /// Artifact name
    pub secret_name: String,
    /// Artifact namespace
    pub secret_namespace: String,
    /// Keys the artifact exposes
    pub secret_keys: Vec<String>,
    /// The artifact is older than the rotation check age
    pub needs_rotation: bool,
    /// When this provision ran
    pub provisioned_at: DateTime<Utc>,
    /// Strategy-specific details (provider, source/target, store, sync state)
    pub metadata: BTreeMap<String, String>,
}

/// Read-only view of an artifact's health
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HealthReport {
    /// Artifact is present and usable
    pub healthy: bool,
    /// Summary
    pub message: String,
    /// Non-fatal findings
    pub warnings: Vec<String>,
    /// Strategy-specific details
    pub metadata: BTreeMap<String, String>,
}

impl HealthReport {
    /// Unhealthy report with a message
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Provisioning strategy, selected by the provider's auth type
pub enum Strategy {
    /// Copy the master key
    DirectCopy(DirectCopy),
    /// Delegate to External Secrets Operator
    DelegatedSync(DelegatedSync),
}

impl Strategy {
    /// Strategy for `provider`, or `None` when its auth type cannot be provisioned
    pub fn for_declaration(
        provider: &CredentialProvider,
        client: Arc<dyn ProvisionClient>,
        adapter: Arc<dyn ExternalStoreAdapter>,
    ) -> Option<Self> {
        Self::for_auth_type(provider.spec.auth.type_, client, adapter)
    }

    /// Strategy for an auth type, or `None` when it cannot be provisioned
    pub fn for_auth_type(
        auth_type: AuthType,
        client: Arc<dyn ProvisionClient>,
        adapter: Arc<dyn ExternalStoreAdapter>,
    ) -> Option<Self> {
        match auth_type {
            AuthType::ApiKey => Some(Self::DirectCopy(DirectCopy::new(client))),
            AuthType::ExternalSecret => {
                Some(Self::DelegatedSync(DelegatedSync::new(client, adapter)))
            }
            AuthType::WorkloadIdentity => None,
        }
    }

    /// Auth type this strategy serves
    pub fn kind(&self) -> AuthType {
        match self {
            Self::DirectCopy(_) => AuthType::ApiKey,
            Self::DelegatedSync(_) => AuthType::ExternalSecret,
        }
    }

    /// Create or update the artifact for `grant`
    pub async fn provision(
        &self,
        provider: &CredentialProvider,
        grant: &CredentialGrant,
    ) -> Result<ProvisionResult, ProvisionError> {
        match self {
            Self::DirectCopy(s) => s.provision(provider, grant).await,
            Self::DelegatedSync(s) => s.provision(provider, grant).await,
        }
    }

    /// Remove the artifact for `grant`; already absent is success
    pub async fn cleanup(&self, grant: &CredentialGrant) -> Result<(), ProvisionError> {
        match self {
            Self::DirectCopy(s) => s.cleanup(grant).await,
            Self::DelegatedSync(s) => s.cleanup(grant).await,
        }
    }

    /// Inspect the artifact without changing it
    pub async fn health_check(
        &self,
        provider: &CredentialProvider,
        grant: &CredentialGrant,
    ) -> Result<HealthReport, ProvisionError> {
        match self {
            Self::DirectCopy(s) => s.health_check(provider, grant).await,
            Self::DelegatedSync(s) => s.health_check(grant).await,
        }
    }
}

/// Namespace of a grant; grants are namespaced so absence means a malformed object
pub(crate) fn grant_namespace(grant: &CredentialGrant) -> Result<String, ProvisionError> {
    grant
        .namespace()
        .ok_or_else(|| ProvisionError::Internal(format!("grant {} has no namespace", grant.name_any())))
}

/// Metadata for an artifact owned by `grant`
pub(crate) fn artifact_metadata(
    provider: &CredentialProvider,
    grant: &CredentialGrant,
    namespace: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(grant.spec.secret_name.clone()),
        namespace: Some(namespace.to_string()),
        labels: Some(artifact_labels(
            &provider.name_any(),
            &grant.name_any(),
            provider.spec.auth.type_.as_str(),
        )),
        owner_references: controller_owner_ref(grant).map(|o| vec![o]),
        ..Default::default()
    }
}

/// Metadata common to every strategy's result
pub(crate) fn base_metadata(provider: &CredentialProvider) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("provider".to_string(), provider.name_any());
    metadata.insert(
        "providerType".to_string(),
        provider.spec.provider.as_str().to_string(),
    );
    metadata.insert(
        "authType".to_string(),
        provider.spec.auth.type_.as_str().to_string(),
    );
    metadata
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use keygate_common::crd::{
        ApiKeyAuth, AuthConfig, CredentialGrantSpec, CredentialProviderSpec, ExternalSecretAuth,
        ProviderReference, ProviderType, RemoteReference, RotationConfig, SecretKeyReference,
        StoreKind, StoreReference,
    };

    pub fn api_key_provider(rotation_enabled: bool) -> CredentialProvider {
        let mut p = CredentialProvider::new(
            "openai-prod",
            CredentialProviderSpec {
                provider: ProviderType::OpenAi,
                auth: AuthConfig {
                    type_: AuthType::ApiKey,
                    api_key: Some(ApiKeyAuth {
                        secret_ref: SecretKeyReference {
                            name: "openai-master".to_string(),
                            namespace: "keygate-system".to_string(),
                            key: "api-key".to_string(),
                        },
                        rotation: Some(RotationConfig {
                            enabled: rotation_enabled,
                            interval: Some("24h".to_string()),
                            strategy: None,
                        }),
                    }),
                    external_secret: None,
                    workload_identity: None,
                },
                allowed_capabilities: vec![],
                rate_limit: None,
                namespace_selector: None,
                endpoint: None,
            },
        );
        p.metadata.uid = Some("provider-uid".to_string());
        p
    }

    pub fn external_secret_provider(refresh: Option<&str>) -> CredentialProvider {
        let mut p = CredentialProvider::new(
            "anthropic-vault",
            CredentialProviderSpec {
                provider: ProviderType::Anthropic,
                auth: AuthConfig {
                    type_: AuthType::ExternalSecret,
                    api_key: None,
                    external_secret: Some(ExternalSecretAuth {
                        store: StoreReference {
                            name: "vault-backend".to_string(),
                            kind: StoreKind::ClusterSecretStore,
                        },
                        remote_ref: RemoteReference {
                            key: "llm/anthropic".to_string(),
                            property: Some("api_key".to_string()),
                            version: None,
                        },
                        refresh_interval: refresh.map(String::from),
                    }),
                    workload_identity: None,
                },
                allowed_capabilities: vec![],
                rate_limit: None,
                namespace_selector: None,
                endpoint: None,
            },
        );
        p.metadata.uid = Some("provider-uid".to_string());
        p
    }

    pub fn grant(provider: &str) -> CredentialGrant {
        let mut g = CredentialGrant::new(
            "chatbot",
            CredentialGrantSpec {
                provider_ref: ProviderReference {
                    name: provider.to_string(),
                },
                capabilities: vec![],
                secret_name: "chatbot-key".to_string(),
                workload_selector: None,
                injection: Default::default(),
                rotation: None,
            },
        );
        g.metadata.namespace = Some("team-a".to_string());
        g.metadata.uid = Some("grant-uid".to_string());
        g
    }

    pub fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;
    use crate::eso::MockExternalStoreAdapter;

    fn strategy_for(auth: AuthType) -> Option<Strategy> {
        Strategy::for_auth_type(
            auth,
            Arc::new(MockProvisionClient::new()),
            Arc::new(MockExternalStoreAdapter::new()),
        )
    }

    #[test]
    fn strategy_selected_by_auth_type() {
        assert_eq!(strategy_for(AuthType::ApiKey).map(|s| s.kind()), Some(AuthType::ApiKey));
        assert_eq!(
            strategy_for(AuthType::ExternalSecret).map(|s| s.kind()),
            Some(AuthType::ExternalSecret)
        );
        assert!(strategy_for(AuthType::WorkloadIdentity).is_none());
    }

    #[test]
    fn for_declaration_reads_auth_type() {
        let strategy = Strategy::for_declaration(
            &external_secret_provider(None),
            Arc::new(MockProvisionClient::new()),
            Arc::new(MockExternalStoreAdapter::new()),
        );
        assert!(matches!(strategy, Some(Strategy::DelegatedSync(_))));
    }

    #[test]
    fn artifact_metadata_carries_labels_and_owner() {
        let provider = api_key_provider(false);
        let meta = artifact_metadata(&provider, &grant("openai-prod"), "team-a");
        assert_eq!(meta.name.as_deref(), Some("chatbot-key"));
        assert_eq!(meta.namespace.as_deref(), Some("team-a"));

        let labels = meta.labels.unwrap();
        assert_eq!(labels["keygate.dev/managed-by"], "keygate");
        assert_eq!(labels["keygate.dev/provider"], "openai-prod");
        assert_eq!(labels["keygate.dev/grant"], "chatbot");
        assert_eq!(labels["keygate.dev/auth-type"], "apiKey");

        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "grant-uid");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn grant_without_namespace_is_internal_error() {
        let mut g = grant("openai-prod");
        g.metadata.namespace = None;
        assert!(matches!(grant_namespace(&g), Err(ProvisionError::Internal(_))));
    }

    #[test]
    fn error_retryability() {
        assert!(ProvisionError::SourceSecretNotFound {
            namespace: "ns".into(),
            name: "n".into()
        }
        .is_retryable());
        assert!(!ProvisionError::MissingConfig("p".into()).is_retryable());
        assert!(ProvisionError::kube("apply", api_error(500)).is_retryable());
        assert!(ProvisionError::kube("apply", api_error(409)).is_retryable());
        assert!(!ProvisionError::kube("apply", api_error(403)).is_retryable());
    }

    #[test]
    fn error_messages_name_the_artifact() {
        let err = ProvisionError::SourceKeyMissing {
            namespace: "keygate-system".into(),
            name: "openai-master".into(),
            key: "api-key".into(),
        };
        assert_eq!(
            err.to_string(),
            "key 'api-key' not found in source secret keygate-system/openai-master"
        );

        let err = ProvisionError::kube("failed to apply Secret team-a/chatbot-key", api_error(500));
        assert!(err.to_string().starts_with("failed to apply Secret team-a/chatbot-key: "));
    }

    #[test]
    fn converts_into_common_error() {
        let err: keygate_common::Error = ProvisionError::MissingConfig("openai-prod".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.resource(), Some("openai-prod"));

        let err: keygate_common::Error = ProvisionError::SourceSecretNotFound {
            namespace: "ns".into(),
            name: "n".into(),
        }
        .into();
        assert!(err.is_retryable());
    }
}
