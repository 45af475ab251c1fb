//! Shared reconciler context

use std::sync::Arc;

use kube::Client;

use keygate_common::crd::CredentialProvider;
use keygate_common::events::{EventPublisher, KubeEventPublisher};
use keygate_provisioner::{
    DirectCopy, EsoV1Beta1Adapter, ExternalStoreAdapter, KubeProvisionClient, ProvisionClient,
    Strategy,
};

use crate::client::{KubeClient, KubeClientImpl};

/// Reporter name for Events emitted by the controllers
pub const CONTROLLER_NAME: &str = "keygate-controller";

/// Controller context shared by the grant and provider reconcilers
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client).build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Client used by provisioning strategies
    pub provision: Arc<dyn ProvisionClient>,
    /// ESO schema adapter for the delegated-sync strategy
    pub adapter: Arc<dyn ExternalStoreAdapter>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock clients
    ///
    /// Events are dropped.
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        provision: Arc<dyn ProvisionClient>,
        adapter: Arc<dyn ExternalStoreAdapter>,
    ) -> Self {
        Self {
            kube,
            provision,
            adapter,
            events: Arc::new(keygate_common::events::NoopEventPublisher),
        }
    }

    /// Strategy serving `provider`, `None` when its auth type is unsupported
    pub fn strategy_for(&self, provider: &CredentialProvider) -> Option<Strategy> {
        Strategy::for_declaration(provider, self.provision.clone(), self.adapter.clone())
    }

    /// Strategy used to clean up when the provider is gone
    pub fn fallback_strategy(&self) -> Strategy {
        Strategy::DirectCopy(DirectCopy::new(self.provision.clone()))
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    provision: Option<Arc<dyn ProvisionClient>>,
    adapter: Option<Arc<dyn ExternalStoreAdapter>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            provision: None,
            adapter: None,
            events: None,
        }
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the provisioning client
    pub fn provision_client(mut self, provision: Arc<dyn ProvisionClient>) -> Self {
        self.provision = Some(provision);
        self
    }

    /// Override the ESO adapter (defaults to v1beta1)
    pub fn adapter(mut self, adapter: Arc<dyn ExternalStoreAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            provision: self
                .provision
                .unwrap_or_else(|| Arc::new(KubeProvisionClient::new(self.client.clone()))),
            adapter: self.adapter.unwrap_or_else(|| Arc::new(EsoV1Beta1Adapter)),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
        }
    }
}
