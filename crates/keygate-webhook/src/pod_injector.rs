//! Pod credential injection
//!
//! On pod creation, every CredentialGrant in the pod's namespace whose
//! workload selector matches the pod labels contributes its env vars and
//! volume to every container and init container. The webhook is fail-open:
//! when grants cannot be listed the pod is admitted unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, Pod, SecretKeySelector, SecretVolumeSource, Volume,
    VolumeMount,
};
use kube::api::{Api, ListParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use keygate_common::crd::CredentialGrant;
use keygate_common::metrics;
use keygate_common::{
    ANNOTATION_INJECTED_PROVIDERS, ANNOTATION_INJECTION_STATUS, INJECTED_VOLUME_PREFIX,
    INJECTION_STATUS_INJECTED,
};

use crate::{bad_request, parse_review, WebhookError, WebhookState};

/// Source of the CredentialGrants in a namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GrantLister: Send + Sync {
    /// Every grant in `namespace`
    async fn list_grants(&self, namespace: &str) -> Result<Vec<CredentialGrant>, kube::Error>;
}

/// [`GrantLister`] backed by the API server
pub struct KubeGrantLister {
    client: Client,
}

impl KubeGrantLister {
    /// Create a lister over `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GrantLister for KubeGrantLister {
    async fn list_grants(&self, namespace: &str) -> Result<Vec<CredentialGrant>, kube::Error> {
        let api: Api<CredentialGrant> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request = parse_review(&body)?;
    let response = mutate_pod(state.grants.as_ref(), &request).await;
    Ok(Json(response.into_review()))
}

/// Inject every matching grant into the pod carried by `request`
pub async fn mutate_pod(
    lister: &dyn GrantLister,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.as_str();

    let Some(obj) = &request.object else {
        debug!(uid, "No pod object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let pod: Pod = match serde_json::to_value(obj).and_then(serde_json::from_value) {
        Ok(pod) => pod,
        Err(e) => {
            error!(uid, error = %e, "Failed to decode pod");
            return bad_request(request, format!("failed to decode pod: {e}"));
        }
    };

    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.namespace())
        .unwrap_or_default();

    let grants = match lister.list_grants(&namespace).await {
        Ok(grants) => grants,
        Err(e) => {
            warn!(uid, namespace = %namespace, error = %e, "Failed to list CredentialGrants, allowing pod unchanged");
            return AdmissionResponse::from(request);
        }
    };

    let pod_labels = pod.labels().clone();
    let matched: Vec<&CredentialGrant> = grants
        .iter()
        .filter(|g| selects(g, &pod_labels))
        .collect();
    if matched.is_empty() {
        debug!(uid, namespace = %namespace, "No matching CredentialGrants");
        return AdmissionResponse::from(request);
    }

    let mut mutated = pod.clone();
    let mut providers = Vec::with_capacity(matched.len());
    for grant in &matched {
        inject(&mut mutated, grant);
        let provider = grant.spec.provider_ref.name.as_str();
        providers.push(provider);
        metrics::record_injection(&namespace, provider);
    }

    let annotations = mutated.annotations_mut();
    annotations.insert(ANNOTATION_INJECTED_PROVIDERS.to_string(), providers.join(","));
    annotations.insert(
        ANNOTATION_INJECTION_STATUS.to_string(),
        INJECTION_STATUS_INJECTED.to_string(),
    );

    let patch = match (serde_json::to_value(&pod), serde_json::to_value(&mutated)) {
        (Ok(original), Ok(updated)) => json_patch::diff(&original, &updated),
        (Err(e), _) | (_, Err(e)) => {
            error!(uid, error = %e, "Failed to serialize pod");
            return AdmissionResponse::from(request).deny(format!("pod serialization error: {e}"));
        }
    };

    info!(
        uid,
        namespace = %namespace,
        pod = %pod.name_any(),
        providers = %providers.join(","),
        "Injecting credentials into pod"
    );

    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Whether `grant` targets a pod with `labels`; grants without a selector never do
fn selects(grant: &CredentialGrant, labels: &BTreeMap<String, String>) -> bool {
    match &grant.spec.workload_selector {
        None => false,
        Some(selector) => match selector.validate() {
            Ok(()) => selector.matches(labels),
            Err(e) => {
                warn!(grant = %grant.name_any(), error = %e, "Invalid workload selector");
                false
            }
        },
    }
}

/// Add `grant`'s env vars and volume to every container and init container
fn inject(pod: &mut Pod, grant: &CredentialGrant) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };
    let secret_name = &grant.spec.secret_name;
    let injection = &grant.spec.injection;

    let env: Vec<EnvVar> = injection
        .env
        .iter()
        .map(|mapping| EnvVar {
            name: mapping.name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name.clone(),
                    key: mapping.secret_key.clone(),
                    optional: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    let mount = injection.volume.as_ref().map(|volume| VolumeMount {
        name: format!("{INJECTED_VOLUME_PREFIX}{}", grant.name_any()),
        mount_path: volume.mount_path.clone(),
        read_only: Some(volume.read_only),
        ..Default::default()
    });

    if let Some(mount) = &mount {
        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == mount.name) {
            volumes.push(Volume {
                name: mount.name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }

    let containers = spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten());
    for container in containers {
        add_to_container(container, &env, mount.as_ref());
    }
}

fn add_to_container(container: &mut Container, env: &[EnvVar], mount: Option<&VolumeMount>) {
    if !env.is_empty() {
        container
            .env
            .get_or_insert_with(Vec::new)
            .extend(env.iter().cloned());
    }
    if let Some(mount) = mount {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(mount.clone());
    }
}
