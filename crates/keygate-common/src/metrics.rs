//! OpenTelemetry metrics for keygate
//!
//! Instruments hang off the global meter. Until `init_telemetry` installs an
//! exporter they record into a no-op provider, so tests can call the record
//! helpers freely.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for keygate metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("keygate"));

// ============================================================================
// Grant Metrics
// ============================================================================

/// Gauge of grants by outcome of their last reconcile
///
/// Labels:
/// - `provider`: provider name
/// - `namespace`: grant namespace
/// - `status`: ready, not_ready
pub static GRANTS_TOTAL: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("keygate_grants_total")
        .with_description("CredentialGrants by provider and readiness")
        .with_unit("{grants}")
        .build()
});

/// Counter of provisioning attempts
///
/// Labels:
/// - `provider`, `namespace`
/// - `result`: success, failure
pub static SECRET_PROVISIONING_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("keygate_secret_provisioning_total")
        .with_description("Credential artifact provisioning attempts")
        .with_unit("{attempts}")
        .build()
});

/// Counter of completed rotations
pub static CREDENTIAL_ROTATIONS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("keygate_credential_rotations_total")
        .with_description("Credential rotations performed")
        .with_unit("{rotations}")
        .build()
});

/// Counter of failed rotations
///
/// Labels:
/// - `provider`, `namespace`
/// - `error_type`: transient, permanent
pub static CREDENTIAL_ROTATION_ERRORS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("keygate_credential_rotation_errors_total")
        .with_description("Credential rotations that failed")
        .with_unit("{errors}")
        .build()
});

/// Gauge of artifact age in seconds
pub static CREDENTIAL_AGE_SECONDS: Lazy<Gauge<f64>> = Lazy::new(|| {
    METER
        .f64_gauge("keygate_credential_age_seconds")
        .with_description("Seconds since the credential artifact was provisioned")
        .with_unit("s")
        .build()
});

/// Gauge of seconds until the next scheduled rotation
pub static CREDENTIAL_NEXT_ROTATION_SECONDS: Lazy<Gauge<f64>> = Lazy::new(|| {
    METER
        .f64_gauge("keygate_credential_next_rotation_seconds")
        .with_description("Seconds until the next credential rotation")
        .with_unit("s")
        .build()
});

// ============================================================================
// Provider Metrics
// ============================================================================

/// Gauge of provider health (1 healthy, 0 unhealthy)
///
/// Labels:
/// - `provider`: provider name
/// - `provider_type`: openai, anthropic, ...
pub static PROVIDER_HEALTH: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("keygate_provider_health")
        .with_description("CredentialProvider health (1 healthy, 0 unhealthy)")
        .with_unit("{status}")
        .build()
});

// ============================================================================
// Webhook Metrics
// ============================================================================

/// Counter of pod injections
///
/// Labels:
/// - `namespace`: pod namespace
/// - `provider`: provider whose grant matched
pub static WEBHOOK_INJECTIONS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("keygate_webhook_injections_total")
        .with_description("Pods mutated with credential references")
        .with_unit("{injections}")
        .build()
});

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: credential_grant, credential_provider
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("keygate_reconcile_duration_seconds")
        .with_description("Duration of reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("keygate_reconcile_errors_total")
        .with_description("Reconciliation errors by controller")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Outcome label for provisioning attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningResult {
    /// Artifact written
    Success,
    /// Strategy returned an error
    Failure,
}

impl ProvisioningResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a provisioning attempt
pub fn record_provisioning(provider: &str, namespace: &str, result: ProvisioningResult) {
    SECRET_PROVISIONING_TOTAL.add(
        1,
        &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new("result", result.as_str()),
        ],
    );
}

/// Record a grant's readiness
pub fn record_grant_status(provider: &str, namespace: &str, ready: bool) {
    GRANTS_TOTAL.record(
        1,
        &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new("status", if ready { "ready" } else { "not_ready" }),
        ],
    );
}

/// Record a completed rotation
pub fn record_rotation(provider: &str, namespace: &str) {
    CREDENTIAL_ROTATIONS_TOTAL.add(
        1,
        &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("namespace", namespace.to_string()),
        ],
    );
}

/// Record a failed rotation
pub fn record_rotation_error(provider: &str, namespace: &str, error_type: &str) {
    CREDENTIAL_ROTATION_ERRORS_TOTAL.add(
        1,
        &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new("error_type", error_type.to_string()),
        ],
    );
}

/// Record credential age and time until next rotation for a grant
pub fn record_credential_timing(
    provider: &str,
    namespace: &str,
    grant: &str,
    age_secs: f64,
    next_rotation_secs: Option<f64>,
) {
    let labels = [
        KeyValue::new("provider", provider.to_string()),
        KeyValue::new("namespace", namespace.to_string()),
        KeyValue::new("grant", grant.to_string()),
    ];
    CREDENTIAL_AGE_SECONDS.record(age_secs, &labels);
    if let Some(next) = next_rotation_secs {
        CREDENTIAL_NEXT_ROTATION_SECONDS.record(next, &labels);
    }
}

/// Record provider health
pub fn record_provider_health(provider: &str, provider_type: &str, healthy: bool) {
    PROVIDER_HEALTH.record(
        i64::from(healthy),
        &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("provider_type", provider_type.to_string()),
        ],
    );
}

/// Record one pod injection for a (namespace, provider) pair
pub fn record_injection(namespace: &str, provider: &str) {
    WEBHOOK_INJECTIONS_TOTAL.add(
        1,
        &[
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new("provider", provider.to_string()),
        ],
    );
}

/// Timer for reconcile duration
pub struct ReconcileTimer {
    controller: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start(controller: &'static str) -> Self {
        Self {
            controller,
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, error_type: &str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "error"),
            ],
        );
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("error_type", error_type.to_string()),
            ],
        );
    }
}
