//! Kubernetes Event recording for keygate controllers.
//!
//! Policy rejections surface through Events as well as status conditions,
//! so tenants see them in `kubectl describe credentialgrant`.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`; failures are swallowed.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reason strings (REASON column of `kubectl get events`).
pub mod reasons {
    /// Referenced CredentialProvider does not exist
    pub const DECLARATION_NOT_FOUND: &str = "DeclarationNotFound";
    /// Namespace rejected by the provider's namespace selector
    pub const NAMESPACE_NOT_ALLOWED: &str = "NamespaceNotAllowed";
    /// Capability outside the provider's allow-list
    pub const CAPABILITY_NOT_ALLOWED: &str = "CapabilityNotAllowed";
    /// Provider auth type cannot be provisioned
    pub const STRATEGY_UNSUPPORTED: &str = "StrategyUnsupported";
    /// Artifact could not be written
    pub const PROVISIONING_FAILED: &str = "ProvisioningFailed";
    /// Artifact written and grant ready
    pub const CREDENTIAL_READY: &str = "CredentialReady";
    /// Artifact removed during grant deletion
    pub const CLEANUP_COMPLETE: &str = "CleanupComplete";
    /// Artifact removal failed; finalizer retained
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
    /// Provider master credential failed validation
    pub const PROVIDER_UNHEALTHY: &str = "ProviderUnhealthy";
    /// Provider master credential validated again after a failure
    pub const PROVIDER_HEALTHY: &str = "ProviderHealthy";
}

/// Event action strings (ACTION column of `kubectl get events`).
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Artifact provisioning
    pub const PROVISION: &str = "Provision";
    /// Finalizer cleanup
    pub const CLEANUP: &str = "Cleanup";
    /// Spec validation against the provider
    pub const VALIDATE: &str = "Validate";
}
