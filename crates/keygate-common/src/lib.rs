//! Common types for keygate: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod duration;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::{Error, ReconcileError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all keygate CRDs
pub const API_GROUP: &str = "keygate.dev";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "keygate-controller";

/// Finalizer guarding artifact cleanup on CredentialGrant deletion
pub const GRANT_FINALIZER: &str = "keygate.dev/cleanup";

/// Standard Kubernetes label for the managing tool
pub const LABEL_MANAGED_BY: &str = "keygate.dev/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on resources created by keygate
pub const LABEL_MANAGED_BY_KEYGATE: &str = "keygate";

/// Label carrying the CredentialProvider name on provisioned artifacts
pub const LABEL_PROVIDER: &str = "keygate.dev/provider";

/// Label carrying the owning CredentialGrant name on provisioned artifacts
pub const LABEL_GRANT: &str = "keygate.dev/grant";

/// Label carrying the authentication type that produced an artifact
pub const LABEL_AUTH_TYPE: &str = "keygate.dev/auth-type";

/// Pod annotation listing the providers whose credentials were injected
pub const ANNOTATION_INJECTED_PROVIDERS: &str = "keygate.dev/injected-providers";

/// Pod annotation recording that injection happened
pub const ANNOTATION_INJECTION_STATUS: &str = "keygate.dev/injection-status";

/// Value of [`ANNOTATION_INJECTION_STATUS`] after a successful mutation
pub const INJECTION_STATUS_INJECTED: &str = "injected";

/// Well-known artifact key holding the primary credential
pub const SECRET_KEY_API_KEY: &str = "apiKey";

/// Artifact key holding the endpoint override (only when declared)
pub const SECRET_KEY_BASE_URL: &str = "baseUrl";

/// Artifact key holding the provider type tag
pub const SECRET_KEY_PROVIDER: &str = "provider";

/// Prefix for volumes injected into pods (`keygate-<grant>`)
pub const INJECTED_VOLUME_PREFIX: &str = "keygate-";

/// Build the standard label set for a provisioned artifact
pub fn artifact_labels(
    provider: &str,
    grant: &str,
    auth_type: &str,
) -> std::collections::BTreeMap<String, String> {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_KEYGATE.to_string(),
    );
    labels.insert(LABEL_PROVIDER.to_string(), provider.to_string());
    labels.insert(LABEL_GRANT.to_string(), grant.to_string());
    labels.insert(LABEL_AUTH_TYPE.to_string(), auth_type.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_labels_identify_owner_and_provider() {
        let labels = artifact_labels("openai-prod", "my-access", "apiKey");
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some("keygate"));
        assert_eq!(labels.get(LABEL_PROVIDER).map(String::as_str), Some("openai-prod"));
        assert_eq!(labels.get(LABEL_GRANT).map(String::as_str), Some("my-access"));
        assert_eq!(labels.get(LABEL_AUTH_TYPE).map(String::as_str), Some("apiKey"));
    }

    #[test]
    fn finalizer_lives_in_api_group() {
        assert!(GRANT_FINALIZER.starts_with(API_GROUP));
    }
}
