//! Shared Kubernetes helpers
//!
//! `HasApiResource` gives compile-time API coordinates to types that are
//! applied through `DynamicObject` (ESO resources); the remaining helpers
//! cover owner references and error classification.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for external resource types to derive their `ApiResource`
/// from constants, keeping serialization and API calls consistent.
pub trait HasApiResource {
    /// Full API version (e.g., "external-secrets.io/v1beta1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "ExternalSecret")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); core types have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind with the usual English rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Controller owner reference pointing at `owner`
///
/// Returns `None` if the owner has not been persisted yet (no uid).
pub fn controller_owner_ref<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let uid = owner.meta().uid.clone()?;
    Some(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether an error message indicates a missing CRD or resource type
///
/// Used when the ESO CRDs may not be installed yet.
pub fn is_crd_not_found(message: &str) -> bool {
    message.contains("404")
        || message.contains("not found")
        || message.contains("the server could not find the requested resource")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CredentialGrant, CredentialGrantSpec, ProviderReference};

    struct TestResource;

    impl HasApiResource for TestResource {
        const API_VERSION: &'static str = "external-secrets.io/v1beta1";
        const KIND: &'static str = "ExternalSecret";
    }

    #[test]
    fn test_has_api_resource() {
        let ar = TestResource::api_resource();
        assert_eq!(ar.group, "external-secrets.io");
        assert_eq!(ar.version, "v1beta1");
        assert_eq!(ar.kind, "ExternalSecret");
        assert_eq!(ar.plural, "externalsecrets");
        assert_eq!(ar.api_version, "external-secrets.io/v1beta1");
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
        assert_eq!(
            parse_api_version("keygate.dev/v1alpha1"),
            ("keygate.dev".to_string(), "v1alpha1".to_string())
        );
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Secret"), "secrets");
        assert_eq!(pluralize_kind("ClusterSecretStore"), "clustersecretstores");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
    }

    fn grant(uid: Option<&str>) -> CredentialGrant {
        let mut g = CredentialGrant::new(
            "chatbot",
            CredentialGrantSpec {
                provider_ref: ProviderReference {
                    name: "openai".to_string(),
                },
                capabilities: vec![],
                secret_name: "chatbot-key".to_string(),
                workload_selector: None,
                injection: Default::default(),
                rotation: None,
            },
        );
        g.metadata.namespace = Some("team-a".to_string());
        g.metadata.uid = uid.map(String::from);
        g
    }

    #[test]
    fn owner_ref_marks_grant_as_controller() {
        let owner = controller_owner_ref(&grant(Some("uid-1"))).unwrap();
        assert_eq!(owner.api_version, "keygate.dev/v1alpha1");
        assert_eq!(owner.kind, "CredentialGrant");
        assert_eq!(owner.name, "chatbot");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn owner_ref_requires_uid() {
        assert!(controller_owner_ref(&grant(None)).is_none());
    }

    #[test]
    fn not_found_classification() {
        let err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"x\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&err));
        assert!(is_crd_not_found(&err.to_string()));
        assert!(is_crd_not_found("the server could not find the requested resource"));
        assert!(!is_crd_not_found("connection refused"));
    }
}
