//! Admission webhooks for keygate
//!
//! - `POST /mutate/pods`: inject grant credentials into matching pods
//! - `POST /validate/credentialgrants`: reject malformed CredentialGrants
//! - `GET /healthz`: liveness
//!
//! Both admission handlers take the raw body so a malformed AdmissionReview
//! is answered with HTTP 400 rather than a framework rejection.

#![deny(missing_docs)]

pub mod error;
pub mod grant_validator;
pub mod pod_injector;
pub mod server;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::core::DynamicObject;
use kube::Client;

pub use error::WebhookError;
pub use pod_injector::{GrantLister, KubeGrantLister};
pub use server::{start_server, ServerConfig};

/// Path of the pod mutation webhook
pub const MUTATE_PODS_PATH: &str = "/mutate/pods";

/// Path of the CredentialGrant validation webhook
pub const VALIDATE_GRANTS_PATH: &str = "/validate/credentialgrants";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Source of CredentialGrants for pod injection
    pub grants: Arc<dyn GrantLister>,
}

impl WebhookState {
    /// State backed by the cluster
    pub fn new(client: Client) -> Self {
        Self {
            grants: Arc::new(KubeGrantLister::new(client)),
        }
    }

    /// State over an arbitrary grant source
    pub fn with_lister(grants: Arc<dyn GrantLister>) -> Self {
        Self { grants }
    }
}

/// Build the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PODS_PATH, post(pod_injector::mutate_handler))
        .route(VALIDATE_GRANTS_PATH, post(grant_validator::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Decode an AdmissionReview body into its request
pub(crate) fn parse_review(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>, WebhookError> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(body)
        .map_err(|e| WebhookError::InvalidReview(format!("malformed AdmissionReview: {e}")))?;
    review
        .try_into()
        .map_err(|e| WebhookError::InvalidReview(format!("{e}")))
}

/// Deny `request` with HTTP-style code 400
pub(crate) fn bad_request(
    request: &AdmissionRequest<DynamicObject>,
    message: impl Into<String>,
) -> kube::core::admission::AdmissionResponse {
    let mut response = kube::core::admission::AdmissionResponse::from(request).deny(message.into());
    response.result.code = 400;
    response.result.reason = "BadRequest".to_string();
    response
}


#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::test_fixtures::*;
    use super::*;
    use crate::pod_injector::MockGrantLister;

    fn router(lister: MockGrantLister) -> Router {
        webhook_router(Arc::new(WebhookState::with_lister(Arc::new(lister))))
    }

    async fn post_json(router: Router, path: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = router(MockGrantLister::new()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    /// Story: garbage posted to the webhook is a client error, not a crash
    #[tokio::test]
    async fn story_malformed_review_is_bad_request() {
        let (status, body) =
            post_json(router(MockGrantLister::new()), MUTATE_PODS_PATH, b"{not json".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("malformed AdmissionReview"));

        let (status, _) = post_json(
            router(MockGrantLister::new()),
            VALIDATE_GRANTS_PATH,
            b"[]".to_vec(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pod_without_grants_is_admitted_through_router() {
        let mut lister = MockGrantLister::new();
        lister.expect_list_grants().returning(|_| Ok(vec![]));

        let pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "team-a"},
            "spec": {"containers": [{"name": "app", "image": "nginx"}]}
        });
        let body = serde_json::to_vec(&pod_review(pod)).unwrap();
        let (status, review) = post_json(router(lister), MUTATE_PODS_PATH, body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["response"]["allowed"], json!(true));
        assert_eq!(review["response"]["uid"], json!("705ab4f5-6393-11e8-b7cc-42010a800002"));
        assert!(review["response"].get("patch").is_none());
    }
}
