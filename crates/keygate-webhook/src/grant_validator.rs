//! CredentialGrant validation
//!
//! Rejects grants the controller or pod injector could never act on.
//! Env names that shadow variables Kubernetes sets itself are allowed but
//! produce admission warnings.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::ResourceExt;
use tracing::{debug, info};

use keygate_common::crd::{CredentialGrant, CredentialGrantSpec};
use keygate_common::duration::parse_duration;
use keygate_common::Error;

use crate::{bad_request, parse_review, WebhookError, WebhookState};

/// Env names Kubernetes or the container runtime already set
const RESERVED_ENV_VARS: [&str; 4] = [
    "KUBERNETES_SERVICE_HOST",
    "KUBERNETES_SERVICE_PORT",
    "HOSTNAME",
    "HOME",
];

/// Handle validating admission review for CredentialGrants
pub async fn validate_handler(
    State(_state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request = parse_review(&body)?;
    Ok(Json(validate_request(&request).into_review()))
}

/// Admit or deny the grant carried by `request`
pub fn validate_request(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return AdmissionResponse::from(request);
    }
    let Some(obj) = &request.object else {
        return AdmissionResponse::from(request);
    };

    let grant: CredentialGrant = match serde_json::to_value(obj).and_then(serde_json::from_value) {
        Ok(grant) => grant,
        Err(e) => return bad_request(request, format!("failed to decode CredentialGrant: {e}")),
    };
    let resource = format!(
        "{}/{}",
        request.namespace.as_deref().unwrap_or_default(),
        grant.name_any()
    );

    match validate_grant(&resource, &grant.spec) {
        Ok(warnings) => {
            debug!(grant = %resource, warnings = warnings.len(), "CredentialGrant admitted");
            let mut response = AdmissionResponse::from(request);
            if !warnings.is_empty() {
                response.warnings = Some(warnings);
            }
            response
        }
        Err(e) => {
            info!(grant = %resource, error = %e, "CredentialGrant rejected");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

/// Validate a grant spec, returning admission warnings on success
pub fn validate_grant(resource: &str, spec: &CredentialGrantSpec) -> Result<Vec<String>, Error> {
    let mut warnings = Vec::new();

    if spec.provider_ref.name.is_empty() {
        return Err(Error::validation_for_field(
            resource,
            "spec.providerRef.name",
            "must not be empty",
        ));
    }
    if spec.secret_name.is_empty() {
        return Err(Error::validation_for_field(
            resource,
            "spec.secretName",
            "must not be empty",
        ));
    }

    let injection = &spec.injection;
    if injection.env.is_empty() && injection.volume.is_none() {
        return Err(Error::validation_for_field(
            resource,
            "spec.injection",
            "must define at least one of: env or volume",
        ));
    }

    for (i, mapping) in injection.env.iter().enumerate() {
        if RESERVED_ENV_VARS.contains(&mapping.name.as_str()) {
            warnings.push(format!(
                "env var '{}' overrides reserved Kubernetes variable",
                mapping.name
            ));
        }
        if !is_valid_env_name(&mapping.name) {
            return Err(Error::validation_for_field(
                resource,
                format!("spec.injection.env[{i}].name"),
                format!("invalid env var name {:?} (must match [A-Z_][A-Z0-9_]*)", mapping.name),
            ));
        }
    }

    if let Some(volume) = &injection.volume {
        if volume.mount_path.is_empty() {
            return Err(Error::validation_for_field(
                resource,
                "spec.injection.volume.mountPath",
                "must not be empty",
            ));
        }
        if !volume.mount_path.starts_with('/') {
            return Err(Error::validation_for_field(
                resource,
                "spec.injection.volume.mountPath",
                "must be an absolute path",
            ));
        }
    }

    if let Some(interval) = spec.rotation_interval() {
        parse_duration(interval).map_err(|e| {
            Error::validation_for_field(resource, "spec.rotation.interval", e.to_string())
        })?;
    }

    if let Some(selector) = &spec.workload_selector {
        selector
            .validate()
            .map_err(|e| Error::validation_for_field(resource, "spec.workloadSelector", e))?;
    }

    Ok(warnings)
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_uppercase() || first == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
