//! Direct-copy strategy
//!
//! Reads the provider's master Secret and server-side applies a copy of the
//! key into the grant's namespace. The artifact also carries the provider
//! type tag and, when declared, the base URL override.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use tracing::{debug, info};

use keygate_common::crd::{CredentialGrant, CredentialProvider};
use keygate_common::{SECRET_KEY_API_KEY, SECRET_KEY_BASE_URL, SECRET_KEY_PROVIDER};

use crate::{
    artifact_metadata, base_metadata, grant_namespace, HealthReport, ProvisionClient,
    ProvisionError, ProvisionResult, ROTATION_CHECK_AGE, ROTATION_WARNING_AGE,
};

const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Copies a master API key into a grant-owned Secret
pub struct DirectCopy {
    client: Arc<dyn ProvisionClient>,
}

impl DirectCopy {
    /// Create the strategy over `client`
    pub fn new(client: Arc<dyn ProvisionClient>) -> Self {
        Self { client }
    }

    /// Copy the master key into `grant.spec.secretName`
    pub async fn provision(
        &self,
        provider: &CredentialProvider,
        grant: &CredentialGrant,
    ) -> Result<ProvisionResult, ProvisionError> {
        let api_key = provider
            .spec
            .auth
            .api_key
            .as_ref()
            .ok_or_else(|| ProvisionError::MissingConfig(provider.name_any()))?;
        let namespace = grant_namespace(grant)?;
        let secret_name = &grant.spec.secret_name;
        let source = &api_key.secret_ref;

        let master = self
            .client
            .get_secret(&source.namespace, &source.name)
            .await
            .map_err(|e| {
                ProvisionError::kube(
                    format!(
                        "failed to get source secret {}/{} for {namespace}/{secret_name}",
                        source.namespace, source.name
                    ),
                    e,
                )
            })?
            .ok_or_else(|| ProvisionError::SourceSecretNotFound {
                namespace: source.namespace.clone(),
                name: source.name.clone(),
            })?;

        let value = master
            .data
            .as_ref()
            .and_then(|d| d.get(&source.key))
            .cloned()
            .ok_or_else(|| ProvisionError::SourceKeyMissing {
                namespace: source.namespace.clone(),
                name: source.name.clone(),
                key: source.key.clone(),
            })?;

        let mut data = BTreeMap::new();
        data.insert(SECRET_KEY_API_KEY.to_string(), value);
        if let Some(base_url) = provider.spec.base_url() {
            data.insert(
                SECRET_KEY_BASE_URL.to_string(),
                ByteString(base_url.as_bytes().to_vec()),
            );
        }
        data.insert(
            SECRET_KEY_PROVIDER.to_string(),
            ByteString(provider.spec.provider.as_str().as_bytes().to_vec()),
        );
        let secret_keys: Vec<String> = data.keys().cloned().collect();

        // The existing artifact's creation time drives the rotation check
        let existing = self
            .client
            .get_secret(&namespace, secret_name)
            .await
            .map_err(|e| {
                ProvisionError::kube(format!("failed to get Secret {namespace}/{secret_name}"), e)
            })?;

        let secret = Secret {
            metadata: artifact_metadata(provider, grant, &namespace),
            data: Some(data),
            type_: Some(SECRET_TYPE_OPAQUE.to_string()),
            ..Default::default()
        };

        self.client
            .apply_secret(&namespace, secret_name, &secret)
            .await
            .map_err(|e| {
                ProvisionError::kube(format!("failed to apply Secret {namespace}/{secret_name}"), e)
            })?;

        info!(
            grant = %grant.name_any(),
            namespace = %namespace,
            secret = %secret_name,
            "Copied master credential into artifact"
        );

        let needs_rotation = provider.spec.rotation_enabled()
            && existing
                .as_ref()
                .and_then(secret_age)
                .is_some_and(|age| age > ROTATION_CHECK_AGE);

        let mut metadata = base_metadata(provider);
        metadata.insert(
            "sourceSecret".to_string(),
            format!("{}/{}", source.namespace, source.name),
        );
        metadata.insert(
            "targetSecret".to_string(),
            format!("{namespace}/{secret_name}"),
        );

        Ok(ProvisionResult {
            secret_name: secret_name.clone(),
            secret_namespace: namespace,
            secret_keys,
            needs_rotation,
            provisioned_at: Utc::now(),
            metadata,
        })
    }

    /// Delete the artifact; already gone is success
    pub async fn cleanup(&self, grant: &CredentialGrant) -> Result<(), ProvisionError> {
        let namespace = grant_namespace(grant)?;
        let secret_name = &grant.spec.secret_name;
        let deleted = self
            .client
            .delete_secret(&namespace, secret_name)
            .await
            .map_err(|e| {
                ProvisionError::kube(format!("failed to delete Secret {namespace}/{secret_name}"), e)
            })?;
        debug!(namespace = %namespace, secret = %secret_name, deleted, "Direct-copy cleanup done");
        Ok(())
    }

    /// Report whether the artifact exists and carries an API key
    pub async fn health_check(
        &self,
        provider: &CredentialProvider,
        grant: &CredentialGrant,
    ) -> Result<HealthReport, ProvisionError> {
        let namespace = grant_namespace(grant)?;
        let secret_name = &grant.spec.secret_name;

        let Some(secret) = self
            .client
            .get_secret(&namespace, secret_name)
            .await
            .map_err(|e| {
                ProvisionError::kube(format!("failed to get Secret {namespace}/{secret_name}"), e)
            })?
        else {
            return Ok(HealthReport::unhealthy("Secret not found"));
        };

        let has_key = secret
            .data
            .as_ref()
            .is_some_and(|d| d.contains_key(SECRET_KEY_API_KEY));
        if !has_key {
            return Ok(HealthReport::unhealthy("API key not found in secret"));
        }

        let mut report = HealthReport {
            healthy: true,
            message: "Secret exists and contains valid API key".to_string(),
            ..Default::default()
        };

        if let Some(api_key) = &provider.spec.auth.api_key {
            let source = &api_key.secret_ref;
            if !matches!(
                self.client.get_secret(&source.namespace, &source.name).await,
                Ok(Some(_))
            ) {
                report.warnings.push(format!(
                    "Source secret {}/{} not accessible",
                    source.namespace, source.name
                ));
            }
        }

        if let Some(age) = secret_age(&secret) {
            report
                .metadata
                .insert("secretAge".to_string(), format!("{}s", age.as_secs()));
            if provider.spec.rotation_enabled() && age > ROTATION_WARNING_AGE {
                report
                    .warnings
                    .push("Secret is nearing rotation interval".to_string());
            }
        }

        Ok(report)
    }
}

fn secret_age(secret: &Secret) -> Option<Duration> {
    let created = secret.metadata.creation_timestamp.as_ref()?;
    (Utc::now() - created.0).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;
    use crate::MockProvisionClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use keygate_common::crd::EndpointConfig;
    use std::sync::Mutex;

    fn master(value: &str) -> Secret {
        let mut data = BTreeMap::new();
        data.insert("api-key".to_string(), ByteString(value.as_bytes().to_vec()));
        Secret {
            metadata: ObjectMeta {
                name: Some("openai-master".to_string()),
                namespace: Some("keygate-system".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn artifact(age_days: i64, with_key: bool) -> Secret {
        let mut data = BTreeMap::new();
        if with_key {
            data.insert("apiKey".to_string(), ByteString(b"sk-123".to_vec()));
        }
        Secret {
            metadata: ObjectMeta {
                name: Some("chatbot-key".to_string()),
                namespace: Some("team-a".to_string()),
                creation_timestamp: Some(Time(Utc::now() - chrono::Duration::days(age_days))),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn is_master(ns: &str, name: &str) -> bool {
        ns == "keygate-system" && name == "openai-master"
    }

    fn is_artifact(ns: &str, name: &str) -> bool {
        ns == "team-a" && name == "chatbot-key"
    }

    /// Client whose master Secret value is read from `value` on every call,
    /// recording every applied artifact
    fn recording_client(
        value: Arc<Mutex<String>>,
        applied: Arc<Mutex<Vec<Secret>>>,
    ) -> MockProvisionClient {
        let mut client = MockProvisionClient::new();
        client
            .expect_get_secret()
            .withf(|ns, name| is_master(ns, name))
            .returning(move |_, _| Ok(Some(master(&value.lock().unwrap()))));
        client
            .expect_get_secret()
            .withf(|ns, name| is_artifact(ns, name))
            .returning(|_, _| Ok(None));
        client
            .expect_apply_secret()
            .withf(|ns, name, _| is_artifact(ns, name))
            .returning(move |_, _, secret| {
                applied.lock().unwrap().push(secret.clone());
                Ok(())
            });
        client
    }

    fn value_of(secret: &Secret, key: &str) -> String {
        let bytes = &secret.data.as_ref().unwrap()[key].0;
        String::from_utf8(bytes.clone()).unwrap()
    }

    /// Story: a master key "sk-123" lands in the tenant namespace, and a
    /// later master update flows through on the next provision without
    /// changing the artifact's name or owner
    #[tokio::test]
    async fn story_master_key_copied_and_updated_in_place() {
        let value = Arc::new(Mutex::new("sk-123".to_string()));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let strategy = DirectCopy::new(Arc::new(recording_client(value.clone(), applied.clone())));
        let provider = api_key_provider(false);
        let grant = grant("openai-prod");

        let result = strategy.provision(&provider, &grant).await.unwrap();
        assert_eq!(result.secret_name, "chatbot-key");
        assert_eq!(result.secret_namespace, "team-a");
        assert_eq!(result.secret_keys, vec!["apiKey", "provider"]);
        assert!(!result.needs_rotation);
        assert_eq!(result.metadata["sourceSecret"], "keygate-system/openai-master");
        assert_eq!(result.metadata["targetSecret"], "team-a/chatbot-key");
        assert_eq!(result.metadata["authType"], "apiKey");

        *value.lock().unwrap() = "sk-456".to_string();
        strategy.provision(&provider, &grant).await.unwrap();

        let applied = applied.lock().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(value_of(&applied[0], "apiKey"), "sk-123");
        assert_eq!(value_of(&applied[1], "apiKey"), "sk-456");
        assert_eq!(value_of(&applied[1], "provider"), "openai");
        assert_eq!(applied[0].metadata.name, applied[1].metadata.name);
        assert_eq!(
            applied[0].metadata.owner_references,
            applied[1].metadata.owner_references
        );
        let owner = &applied[1].metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "CredentialGrant");
        assert_eq!(owner.uid, "grant-uid");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(applied[1].type_.as_deref(), Some("Opaque"));
        assert!(applied[1].string_data.is_none());
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let value = Arc::new(Mutex::new("sk-123".to_string()));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let strategy = DirectCopy::new(Arc::new(recording_client(value, applied.clone())));
        let provider = api_key_provider(false);
        let grant = grant("openai-prod");

        let first = strategy.provision(&provider, &grant).await.unwrap();
        let second = strategy.provision(&provider, &grant).await.unwrap();
        assert_eq!(first.secret_keys, second.secret_keys);

        let applied = applied.lock().unwrap();
        assert_eq!(applied[0], applied[1]);
    }

    #[tokio::test]
    async fn base_url_written_when_declared() {
        let value = Arc::new(Mutex::new("sk-123".to_string()));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let strategy = DirectCopy::new(Arc::new(recording_client(value, applied.clone())));
        let mut provider = api_key_provider(false);
        provider.spec.endpoint = Some(EndpointConfig {
            base_url: Some("https://proxy.internal/v1".to_string()),
        });

        let result = strategy
            .provision(&provider, &grant("openai-prod"))
            .await
            .unwrap();
        assert_eq!(result.secret_keys, vec!["apiKey", "baseUrl", "provider"]);
        assert_eq!(
            value_of(&applied.lock().unwrap()[0], "baseUrl"),
            "https://proxy.internal/v1"
        );
    }

    #[tokio::test]
    async fn missing_master_secret_is_retryable_error() {
        let mut client = MockProvisionClient::new();
        client.expect_get_secret().returning(|_, _| Ok(None));
        client.expect_apply_secret().never();

        let err = DirectCopy::new(Arc::new(client))
            .provision(&api_key_provider(false), &grant("openai-prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::SourceSecretNotFound { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "source secret keygate-system/openai-master not found");
    }

    #[tokio::test]
    async fn missing_master_key_is_retryable_error() {
        let mut client = MockProvisionClient::new();
        client.expect_get_secret().returning(|_, _| {
            let mut s = master("ignored");
            s.data = Some(BTreeMap::new());
            Ok(Some(s))
        });
        client.expect_apply_secret().never();

        let err = DirectCopy::new(Arc::new(client))
            .provision(&api_key_provider(false), &grant("openai-prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::SourceKeyMissing { ref key, .. } if key == "api-key"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_api_key_block_is_config_error() {
        let mut provider = api_key_provider(false);
        provider.spec.auth.api_key = None;
        let err = DirectCopy::new(Arc::new(MockProvisionClient::new()))
            .provision(&provider, &grant("openai-prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingConfig(ref p) if p == "openai-prod"));
    }

    #[tokio::test]
    async fn old_artifact_needs_rotation_when_enabled() {
        let mut client = MockProvisionClient::new();
        client
            .expect_get_secret()
            .withf(|ns, name| is_master(ns, name))
            .returning(|_, _| Ok(Some(master("sk-123"))));
        client
            .expect_get_secret()
            .withf(|ns, name| is_artifact(ns, name))
            .returning(|_, _| Ok(Some(artifact(2, true))));
        client.expect_apply_secret().returning(|_, _, _| Ok(()));
        let strategy = DirectCopy::new(Arc::new(client));

        let enabled = strategy
            .provision(&api_key_provider(true), &grant("openai-prod"))
            .await
            .unwrap();
        assert!(enabled.needs_rotation);

        let disabled = strategy
            .provision(&api_key_provider(false), &grant("openai-prod"))
            .await
            .unwrap();
        assert!(!disabled.needs_rotation);
    }

    #[tokio::test]
    async fn apply_failure_names_the_artifact() {
        let mut client = MockProvisionClient::new();
        client
            .expect_get_secret()
            .withf(|ns, name| is_master(ns, name))
            .returning(|_, _| Ok(Some(master("sk-123"))));
        client
            .expect_get_secret()
            .withf(|ns, name| is_artifact(ns, name))
            .returning(|_, _| Ok(None));
        client
            .expect_apply_secret()
            .returning(|_, _, _| Err(api_error(500)));

        let err = DirectCopy::new(Arc::new(client))
            .provision(&api_key_provider(false), &grant("openai-prod"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("team-a/chatbot-key"));
    }

    #[tokio::test]
    async fn cleanup_treats_absent_artifact_as_success() {
        let mut client = MockProvisionClient::new();
        client
            .expect_delete_secret()
            .withf(|ns, name| is_artifact(ns, name))
            .times(2)
            .returning({
                let mut calls = 0;
                move |_, _| {
                    calls += 1;
                    Ok(calls == 1)
                }
            });
        let strategy = DirectCopy::new(Arc::new(client));
        let grant = grant("openai-prod");
        strategy.cleanup(&grant).await.unwrap();
        strategy.cleanup(&grant).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_propagates_api_failures() {
        let mut client = MockProvisionClient::new();
        client
            .expect_delete_secret()
            .returning(|_, _| Err(api_error(500)));
        let err = DirectCopy::new(Arc::new(client))
            .cleanup(&grant("openai-prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Kube { .. }));
    }

    #[tokio::test]
    async fn health_reports_missing_artifact() {
        let mut client = MockProvisionClient::new();
        client.expect_get_secret().returning(|_, _| Ok(None));
        let report = DirectCopy::new(Arc::new(client))
            .health_check(&api_key_provider(false), &grant("openai-prod"))
            .await
            .unwrap();
        assert!(!report.healthy);
        assert_eq!(report.message, "Secret not found");
    }

    #[tokio::test]
    async fn health_reports_missing_api_key() {
        let mut client = MockProvisionClient::new();
        client
            .expect_get_secret()
            .returning(|_, _| Ok(Some(artifact(0, false))));
        let report = DirectCopy::new(Arc::new(client))
            .health_check(&api_key_provider(false), &grant("openai-prod"))
            .await
            .unwrap();
        assert!(!report.healthy);
        assert_eq!(report.message, "API key not found in secret");
    }

    /// Story: an old artifact whose master Secret vanished is still healthy,
    /// but both problems surface as warnings
    #[tokio::test]
    async fn story_health_warnings_for_old_artifact_and_lost_master() {
        let mut client = MockProvisionClient::new();
        client
            .expect_get_secret()
            .withf(|ns, name| is_artifact(ns, name))
            .returning(|_, _| Ok(Some(artifact(26, true))));
        client
            .expect_get_secret()
            .withf(|ns, name| is_master(ns, name))
            .returning(|_, _| Err(api_error(403)));

        let report = DirectCopy::new(Arc::new(client))
            .health_check(&api_key_provider(true), &grant("openai-prod"))
            .await
            .unwrap();
        assert!(report.healthy);
        assert_eq!(report.message, "Secret exists and contains valid API key");
        assert_eq!(
            report.warnings,
            vec![
                "Source secret keygate-system/openai-master not accessible".to_string(),
                "Secret is nearing rotation interval".to_string(),
            ]
        );
        assert!(report.metadata.contains_key("secretAge"));
    }
}
