//! Delegated-sync strategy
//!
//! Instead of copying bytes, write an ESO `ExternalSecret` named after the
//! grant's `secretName` and let ESO materialize the Secret. The concrete ESO
//! schema lives behind [`ExternalStoreAdapter`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info};

use keygate_common::artifact_labels;
use keygate_common::crd::{CredentialGrant, CredentialProvider};
use keygate_common::duration::parse_optional;
use keygate_common::kube_utils::controller_owner_ref;
use keygate_common::SECRET_KEY_API_KEY;

use crate::eso::{CreationPolicy, ExternalStoreAdapter, SyncData, SyncRequest, SyncStore, SyncTarget};
use crate::{base_metadata, grant_namespace, HealthReport, ProvisionClient, ProvisionError, ProvisionResult};

/// Refresh interval when neither the grant nor the provider sets one
pub const DEFAULT_REFRESH_INTERVAL: &str = "1h";

/// Hands credential sync to External Secrets Operator
pub struct DelegatedSync {
    client: Arc<dyn ProvisionClient>,
    adapter: Arc<dyn ExternalStoreAdapter>,
}

impl DelegatedSync {
    /// Create the strategy over `client`, emitting objects through `adapter`
    pub fn new(client: Arc<dyn ProvisionClient>, adapter: Arc<dyn ExternalStoreAdapter>) -> Self {
        Self { client, adapter }
    }

    /// Apply the ExternalSecret for `grant`
    pub async fn provision(
        &self,
        provider: &CredentialProvider,
        grant: &CredentialGrant,
    ) -> Result<ProvisionResult, ProvisionError> {
        let config = provider
            .spec
            .auth
            .external_secret
            .as_ref()
            .ok_or_else(|| ProvisionError::MissingConfig(provider.name_any()))?;
        let namespace = grant_namespace(grant)?;
        let name = &grant.spec.secret_name;

        let refresh_interval =
            effective_refresh_interval(grant.spec.rotation_interval(), config.refresh_interval.as_deref());

        let request = SyncRequest {
            refresh_interval: refresh_interval.clone(),
            store: SyncStore {
                name: config.store.name.clone(),
                kind: config.store.kind,
            },
            target: SyncTarget {
                name: name.clone(),
                creation_policy: CreationPolicy::Owner,
            },
            data: vec![SyncData {
                secret_key: SECRET_KEY_API_KEY.to_string(),
                remote_key: config.remote_ref.key.clone(),
                property: config.remote_ref.property.clone(),
                version: config.remote_ref.version.clone(),
            }],
        };

        let labels = artifact_labels(
            &provider.name_any(),
            &grant.name_any(),
            provider.spec.auth.type_.as_str(),
        );
        let mut object = self.adapter.build(&namespace, name, &labels, &request)?;
        object.metadata.owner_references = controller_owner_ref(grant).map(|o| vec![o]);

        let resource = self.adapter.api_resource();
        let stored = self
            .client
            .apply_dynamic(&resource, &namespace, name, &object)
            .await
            .map_err(|e| {
                ProvisionError::kube(
                    format!("failed to apply {} {namespace}/{name}", resource.kind),
                    e,
                )
            })?;

        let sync = self.adapter.parse_sync_status(&stored);
        info!(
            grant = %grant.name_any(),
            namespace = %namespace,
            external_secret = %name,
            sync_ready = sync.ready,
            "Applied ExternalSecret"
        );

        let mut metadata = base_metadata(provider);
        metadata.insert("store".to_string(), config.store.name.clone());
        metadata.insert("storeKind".to_string(), config.store.kind.as_str().to_string());
        metadata.insert("refreshInterval".to_string(), refresh_interval);
        metadata.insert("syncReady".to_string(), sync.ready.to_string());
        metadata.insert("syncMessage".to_string(), sync.message);

        Ok(ProvisionResult {
            secret_name: name.clone(),
            secret_namespace: namespace,
            secret_keys: vec![SECRET_KEY_API_KEY.to_string()],
            needs_rotation: false,
            provisioned_at: Utc::now(),
            metadata,
        })
    }

    /// Delete the ExternalSecret; ESO's Owner policy removes the Secret
    pub async fn cleanup(&self, grant: &CredentialGrant) -> Result<(), ProvisionError> {
        let namespace = grant_namespace(grant)?;
        let name = &grant.spec.secret_name;
        let resource = self.adapter.api_resource();
        let deleted = self
            .client
            .delete_dynamic(&resource, &namespace, name)
            .await
            .map_err(|e| {
                ProvisionError::kube(
                    format!("failed to delete {} {namespace}/{name}", resource.kind),
                    e,
                )
            })?;
        debug!(namespace = %namespace, external_secret = %name, deleted, "Delegated-sync cleanup done");
        Ok(())
    }

    /// Report ESO's view of the sync
    pub async fn health_check(&self, grant: &CredentialGrant) -> Result<HealthReport, ProvisionError> {
        let namespace = grant_namespace(grant)?;
        let name = &grant.spec.secret_name;
        let resource = self.adapter.api_resource();

        let Some(object) = self
            .client
            .get_dynamic(&resource, &namespace, name)
            .await
            .map_err(|e| {
                ProvisionError::kube(
                    format!("failed to get {} {namespace}/{name}", resource.kind),
                    e,
                )
            })?
        else {
            return Ok(HealthReport::unhealthy("ExternalSecret not found"));
        };

        let sync = self.adapter.parse_sync_status(&object);
        let mut report = HealthReport {
            healthy: sync.ready,
            message: sync.message.clone(),
            ..Default::default()
        };
        report
            .metadata
            .insert("syncReady".to_string(), sync.ready.to_string());
        if !sync.ready {
            report.warnings.push(format!(
                "ExternalSecret not yet synced by ESO: {}",
                sync.message
            ));
        }
        Ok(report)
    }
}

/// Refresh interval for the ExternalSecret
///
/// A parseable grant interval wins and is rewritten in ESO's duration syntax;
/// otherwise the provider's value passes through verbatim; otherwise
/// [`DEFAULT_REFRESH_INTERVAL`].
pub fn effective_refresh_interval(grant_interval: Option<&str>, provider_interval: Option<&str>) -> String {
    if let Some(interval) = parse_optional(grant_interval) {
        return to_eso_duration(interval);
    }
    match provider_interval {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => DEFAULT_REFRESH_INTERVAL.to_string(),
    }
}

/// Render a duration in ESO's syntax; ESO has no day unit
fn to_eso_duration(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}m", secs / 60)
    }
}
