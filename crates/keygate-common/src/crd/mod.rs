//! Custom Resource Definitions for keygate
//!
//! This module contains all CRD definitions used by the keygate operator.

mod grant;
mod provider;
mod selector;
mod types;

pub use grant::{
    ArtifactReference, CredentialGrant, CredentialGrantSpec, CredentialGrantStatus,
    EnvVarMapping, GrantConditionType, GrantReason, GrantRotation, GrantState, InjectionConfig,
    ProviderReference, VolumeMapping,
};
pub use provider::{
    ApiKeyAuth, AuthConfig, AuthType, AwsWorkloadIdentity, AzureWorkloadIdentity,
    CredentialProvider, CredentialProviderSpec, CredentialProviderStatus, EndpointConfig,
    ExternalSecretAuth, GcpWorkloadIdentity, ProviderReason, ProviderType, RateLimitConfig,
    RemoteReference, RotationConfig, RotationStrategy, SecretKeyReference, StoreKind,
    StoreReference, WorkloadIdentityAuth,
};
pub use selector::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement};
pub use types::{
    conditions_equivalent, find_condition, set_condition, Condition, ConditionStatus,
};
