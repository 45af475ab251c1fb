//! Error types for the keygate operator
//!
//! Variants carry the resource and field they concern so log lines and
//! admission denials can name them.
//! Each variant carries the resource it concerns so a status condition
//! built from the error is actionable on its own.

use thiserror::Error;

/// Placeholder for errors raised outside any resource
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for keygate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// Source error from kube
        #[from]
        source: kube::Error,
    },

    /// A CRD spec failed validation
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// What is wrong
        message: String,
        /// The invalid field path (e.g., "spec.injection.env[0].name")
        field: Option<String>,
    },

    /// Credential provisioning error
    #[error("provisioning error for {grant}: {message}")]
    Provisioning {
        /// `namespace/name` of the grant being provisioned
        grant: String,
        /// Description of what failed
        message: String,
        /// Whether the error policy should retry
        retryable: bool,
    },

    /// JSON or YAML (de)serialization failure
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// Kind being (de)serialized, when known
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Validation failure without a resource
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provisioning error for a grant
    pub fn provisioning(grant: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            grant: grant.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provisioning error (configuration problem)
    pub fn provisioning_permanent(grant: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            grant: grant.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Serialization failure
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Serialization failure for a known kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Internal failure
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Internal failure tagged with `context`
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether a retry can succeed without a spec change
    ///
    /// Validation and serialization errors need a spec change.
    /// Kubernetes errors are retried unless the API server returned a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Provisioning { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource name if this error is associated with one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            Error::Provisioning { grant, .. } => Some(grant),
            _ => None,
        }
    }

    /// Context of an internal error
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

/// Error returned from controller reconcile functions
///
/// Flattened to strings so the controller runtime can log and requeue
/// without caring where the failure came from.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API call failed
    #[error("kube error: {0}")]
    Kube(String),

    /// Resource spec is invalid and will not succeed until edited
    #[error("validation error: {0}")]
    Validation(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Wrap a kube error with a short description of the failed call
    pub fn kube(context: &str, err: kube::Error) -> Self {
        Self::Kube(format!("{context}: {err}"))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<Error> for ReconcileError {
    fn from(e: Error) -> Self {
        match e {
            Error::Kube { source } => ReconcileError::Kube(source.to_string()),
            Error::Validation { .. } => ReconcileError::Validation(e.to_string()),
            other => ReconcileError::Internal(other.to_string()),
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(e: kube::Error) -> Self {
        ReconcileError::Kube(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    // ==========================================================================
    // Story Tests: Error Propagation in Grant Operations
    // ==========================================================================

    /// Story: Invalid grant specs are caught with the field that is wrong
    #[test]
    fn story_validation_points_at_invalid_field() {
        let err = Error::validation_for_field(
            "team-a/openai-access",
            "spec.injection.env[0].name",
            "must match [A-Z_][A-Z0-9_]*",
        );
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("team-a/openai-access"));
        assert_eq!(err.resource(), Some("team-a/openai-access"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.injection.env[0].name"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: Missing master credentials are retried, misconfiguration is not
    #[test]
    fn story_provisioning_errors_carry_retry_hint() {
        let err = Error::provisioning("team-a/openai", "source secret keygate-system/openai not found");
        assert!(err.to_string().contains("provisioning error for team-a/openai"));
        assert!(err.is_retryable());

        let err = Error::provisioning_permanent("team-a/openai", "apiKey auth missing secretRef");
        assert!(!err.is_retryable());
    }

    /// Story: Kubernetes 4xx responses are not retried, 5xx are
    #[test]
    fn story_kube_errors_classified_by_status() {
        let not_found: Error = api_error(404).into();
        assert!(!not_found.is_retryable());

        let conflict: Error = api_error(409).into();
        assert!(!conflict.is_retryable());

        let unavailable: Error = api_error(503).into();
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn internal_errors_keep_context() {
        let err = Error::internal_with_context("webhook", "listing grants failed");
        assert_eq!(err.context(), Some("webhook"));
        assert!(err.to_string().contains("[webhook]"));

        let err = Error::internal("oops");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.is_retryable());
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let json_err = serde_json::from_str::<u32>("not-a-number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization { kind: None, .. }));
        assert!(!err.is_retryable());

        let err = Error::serialization_for_kind("ExternalSecret", "bad field");
        assert!(matches!(err, Error::Serialization { kind: Some(ref k), .. } if k == "ExternalSecret"));
    }

    #[test]
    fn reconcile_error_flattens_domain_errors() {
        let err: ReconcileError = Error::validation("bad").into();
        assert!(matches!(err, ReconcileError::Validation(_)));

        let err: ReconcileError = Error::from(api_error(500)).into();
        assert!(matches!(err, ReconcileError::Kube(_)));

        let err: ReconcileError = Error::provisioning("ns/g", "x").into();
        assert!(matches!(err, ReconcileError::Internal(_)));

        let err = ReconcileError::kube("failed to get provider", api_error(500));
        assert!(err.to_string().starts_with("kube error: failed to get provider"));
    }
}
