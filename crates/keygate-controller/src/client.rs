//! Kubernetes access for the reconcilers
//!
//! Everything the grant and provider controllers read or write goes through
//! [`KubeClient`], so reconcile logic is testable against a mock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use keygate_common::crd::{
    CredentialGrant, CredentialGrantStatus, CredentialProvider, CredentialProviderStatus,
};
use keygate_common::{Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for the reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a CredentialProvider by name
    async fn get_provider(&self, name: &str) -> Result<Option<CredentialProvider>, Error>;

    /// Labels of a namespace, `None` if the namespace does not exist
    async fn get_namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;

    /// Get a Secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Every CredentialGrant, in any namespace, referencing `provider`
    async fn list_grants_for_provider(&self, provider: &str)
        -> Result<Vec<CredentialGrant>, Error>;

    /// Merge-patch a grant's status
    async fn patch_grant_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CredentialGrantStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a grant (no-op if present)
    async fn add_grant_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a grant (no-op if absent)
    async fn remove_grant_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Merge-patch a provider's status
    async fn patch_provider_status(
        &self,
        name: &str,
        status: &CredentialProviderStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_grant_finalizers(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Vec<String>) -> bool + Send,
    ) -> Result<(), Error> {
        let api: Api<CredentialGrant> = Api::namespaced(self.client.clone(), namespace);

        let Some(grant) = api.get_opt(name).await? else {
            return Ok(());
        };
        let mut finalizers = grant.metadata.finalizers.clone().unwrap_or_default();
        if !edit(&mut finalizers) {
            return Ok(());
        }

        // A concurrent finalizer edit fails the write with 409; the error
        // policy retries against the fresh list
        let patch = finalizers_patch(&finalizers, grant.metadata.resource_version.as_deref());

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}

/// Merge patch replacing `finalizers`, pinned to `resource_version` when known
fn finalizers_patch(finalizers: &[String], resource_version: Option<&str>) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::from(rv);
    }
    serde_json::json!({ "metadata": metadata })
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_provider(&self, name: &str) -> Result<Option<CredentialProvider>, Error> {
        let api: Api<CredentialProvider> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(name)
            .await?
            .map(|ns| ns.metadata.labels.unwrap_or_default()))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_grants_for_provider(
        &self,
        provider: &str,
    ) -> Result<Vec<CredentialGrant>, Error> {
        let api: Api<CredentialGrant> = Api::all(self.client.clone());
        let grants = api.list(&ListParams::default()).await?;
        Ok(grants
            .items
            .into_iter()
            .filter(|g| g.spec.provider_ref.name == provider)
            .collect())
    }

    async fn patch_grant_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CredentialGrantStatus,
    ) -> Result<(), Error> {
        let api: Api<CredentialGrant> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn add_grant_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.patch_grant_finalizers(namespace, name, |finalizers| {
            if finalizers.iter().any(|f| f == finalizer) {
                return false;
            }
            finalizers.push(finalizer.to_string());
            true
        })
        .await
    }

    async fn remove_grant_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.patch_grant_finalizers(namespace, name, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            finalizers.len() != before
        })
        .await
    }

    async fn patch_provider_status(
        &self,
        name: &str,
        status: &CredentialProviderStatus,
    ) -> Result<(), Error> {
        let api: Api<CredentialProvider> = Api::all(self.client.clone());

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}
