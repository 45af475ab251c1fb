//! Resource builders shared by the reconciler tests

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use keygate_common::crd::{
    ApiKeyAuth, AuthConfig, AuthType, AwsWorkloadIdentity, CredentialGrant, CredentialGrantSpec,
    CredentialProvider, CredentialProviderSpec, ExternalSecretAuth, ProviderReference,
    ProviderType, RemoteReference, RotationConfig, SecretKeyReference, StoreKind, StoreReference,
    WorkloadIdentityAuth,
};
use keygate_common::GRANT_FINALIZER;

pub const PROVIDER: &str = "openai-prod";
pub const NAMESPACE: &str = "team-a";
pub const GRANT: &str = "chatbot";
pub const ARTIFACT: &str = "chatbot-key";
pub const MASTER_NAMESPACE: &str = "keygate-system";
pub const MASTER_NAME: &str = "openai-master";
pub const MASTER_KEY: &str = "api-key";

fn provider_with_auth(auth: AuthConfig) -> CredentialProvider {
    let mut p = CredentialProvider::new(
        PROVIDER,
        CredentialProviderSpec {
            provider: ProviderType::OpenAi,
            auth,
            allowed_capabilities: vec![],
            rate_limit: None,
            namespace_selector: None,
            endpoint: None,
        },
    );
    p.metadata.uid = Some("provider-uid".to_string());
    p.metadata.generation = Some(1);
    p
}

/// apiKey provider; `rotation` enables rotation at that interval
pub fn api_key_provider(rotation: Option<&str>) -> CredentialProvider {
    provider_with_auth(AuthConfig {
        type_: AuthType::ApiKey,
        api_key: Some(ApiKeyAuth {
            secret_ref: SecretKeyReference {
                name: MASTER_NAME.to_string(),
                namespace: MASTER_NAMESPACE.to_string(),
                key: MASTER_KEY.to_string(),
            },
            rotation: rotation.map(|interval| RotationConfig {
                enabled: true,
                interval: Some(interval.to_string()),
                strategy: None,
            }),
        }),
        external_secret: None,
        workload_identity: None,
    })
}

pub fn external_secret_provider() -> CredentialProvider {
    provider_with_auth(AuthConfig {
        type_: AuthType::ExternalSecret,
        api_key: None,
        external_secret: Some(ExternalSecretAuth {
            store: StoreReference {
                name: "vault-backend".to_string(),
                kind: StoreKind::ClusterSecretStore,
            },
            remote_ref: RemoteReference {
                key: "llm/openai".to_string(),
                property: None,
                version: None,
            },
            refresh_interval: None,
        }),
        workload_identity: None,
    })
}

pub fn workload_identity_provider() -> CredentialProvider {
    provider_with_auth(AuthConfig {
        type_: AuthType::WorkloadIdentity,
        api_key: None,
        external_secret: None,
        workload_identity: Some(WorkloadIdentityAuth {
            aws: Some(AwsWorkloadIdentity {
                role_arn: "arn:aws:iam::123456789012:role/bedrock".to_string(),
                region: "us-east-1".to_string(),
            }),
            azure: None,
            gcp: None,
        }),
    })
}

/// Grant "chatbot" in team-a that already carries the cleanup finalizer
pub fn grant() -> CredentialGrant {
    let mut g = CredentialGrant::new(
        GRANT,
        CredentialGrantSpec {
            provider_ref: ProviderReference {
                name: PROVIDER.to_string(),
            },
            capabilities: vec![],
            secret_name: ARTIFACT.to_string(),
            workload_selector: None,
            injection: Default::default(),
            rotation: None,
        },
    );
    g.metadata.namespace = Some(NAMESPACE.to_string());
    g.metadata.uid = Some("grant-uid".to_string());
    g.metadata.generation = Some(1);
    g.metadata.finalizers = Some(vec![GRANT_FINALIZER.to_string()]);
    g
}

pub fn master_secret(value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(MASTER_NAME.to_string()),
            namespace: Some(MASTER_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            MASTER_KEY.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("status {code}"),
        reason: "Test".to_string(),
        code,
    })
}
