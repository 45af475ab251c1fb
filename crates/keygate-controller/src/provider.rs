//! CredentialProvider reconciler
//!
//! Validates the provider's auth block, records the result on its `Ready`
//! condition together with how many grants reference it, and repeats the
//! check every [`REQUEUE_INTERVAL`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use keygate_common::crd::{
    conditions_equivalent, find_condition, set_condition, AuthType, Condition, ConditionStatus,
    CredentialProvider, ProviderReason,
};
use keygate_common::events::{actions, reasons};
use keygate_common::metrics::{self, ReconcileTimer};
use keygate_common::ReconcileError;

use crate::context::Context;

/// Interval between credential checks
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue delay applied by [`error_policy`]
pub const REQUEUE_ERROR: Duration = Duration::from_secs(30);

/// `lastCredentialCheck` is only rewritten once it is at least this old
const CHECK_REFRESH_AGE: Duration = Duration::from_secs(240);

const READY: &str = "Ready";

/// Outcome of validating a provider's auth block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialCheck {
    /// Whether the provider can serve grants
    pub healthy: bool,
    /// Condition reason
    pub reason: ProviderReason,
    /// Condition message
    pub message: String,
}

impl CredentialCheck {
    fn healthy(reason: ProviderReason, message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            reason,
            message: message.into(),
        }
    }

    fn unhealthy(reason: ProviderReason, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason,
            message: message.into(),
        }
    }
}

/// Reconcile a CredentialProvider
#[instrument(skip(provider, ctx), fields(provider = %provider.name_any()))]
pub async fn reconcile(
    provider: Arc<CredentialProvider>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let timer = ReconcileTimer::start("credential_provider");
    let result = reconcile_provider(&provider, &ctx).await;
    match &result {
        Ok(_) => timer.success(),
        Err(e) => timer.error(e.kind()),
    }
    result
}

/// Log the failure and retry after [`REQUEUE_ERROR`]
pub fn error_policy(
    provider: Arc<CredentialProvider>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        provider = %provider.name_any(),
        "CredentialProvider reconciliation failed"
    );
    Action::requeue(REQUEUE_ERROR)
}

async fn reconcile_provider(
    provider: &CredentialProvider,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let name = provider.name_any();
    let check = check_credential(provider, ctx).await;
    metrics::record_provider_health(&name, provider.spec.provider.as_str(), check.healthy);

    let current = provider.status.clone().unwrap_or_default();
    let was_healthy = find_condition(&current.conditions, READY).map(|c| c.status == ConditionStatus::True);

    let mut status = current.clone();
    set_condition(
        &mut status.conditions,
        Condition::new(
            READY,
            ConditionStatus::from(check.healthy),
            check.reason.as_str(),
            check.message.as_str(),
        )
        .with_generation(provider.metadata.generation),
    );

    // A failed listing keeps the last known count
    match ctx.kube.list_grants_for_provider(&name).await {
        Ok(grants) => {
            status.grant_count = i32::try_from(grants.len()).unwrap_or(i32::MAX);
        }
        Err(e) => warn!(error = %e, "Failed to count grants for provider"),
    }

    let now = Utc::now();
    let check_is_stale = current.last_credential_check.map_or(true, |last| {
        (now - last).to_std().map_or(true, |age| age >= CHECK_REFRESH_AGE)
    });
    let changed = !conditions_equivalent(&current.conditions, &status.conditions)
        || current.grant_count != status.grant_count;

    if changed || check_is_stale {
        status.last_credential_check = Some(now);
        ctx.kube.patch_provider_status(&name, &status).await?;
    } else {
        debug!("Status unchanged, skipping update");
    }

    if check.healthy {
        if was_healthy == Some(false) {
            info!(reason = %check.reason, "Provider healthy again");
            publish(ctx, provider, EventType::Normal, reasons::PROVIDER_HEALTHY, check.message).await;
        }
    } else if was_healthy != Some(false) {
        warn!(reason = %check.reason, message = %check.message, "Provider unhealthy");
        publish(ctx, provider, EventType::Warning, reasons::PROVIDER_UNHEALTHY, check.message).await;
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Validate the provider's auth block against what it references
pub async fn check_credential(provider: &CredentialProvider, ctx: &Context) -> CredentialCheck {
    let auth = &provider.spec.auth;
    match auth.type_ {
        AuthType::ApiKey => {
            let Some(api_key) = &auth.api_key else {
                return CredentialCheck::unhealthy(
                    ProviderReason::InvalidConfig,
                    "spec.auth.apiKey is required when spec.auth.type is apiKey",
                );
            };
            let r = &api_key.secret_ref;
            match ctx.kube.get_secret(&r.namespace, &r.name).await {
                Ok(Some(secret)) => {
                    if secret.data.as_ref().is_some_and(|d| d.contains_key(&r.key)) {
                        CredentialCheck::healthy(
                            ProviderReason::SecretFound,
                            format!(
                                "provider secret {}/{} exists and contains key {:?}",
                                r.namespace, r.name, r.key
                            ),
                        )
                    } else {
                        CredentialCheck::unhealthy(
                            ProviderReason::SecretKeyMissing,
                            format!("key {:?} not found in secret {}/{}", r.key, r.namespace, r.name),
                        )
                    }
                }
                Ok(None) => CredentialCheck::unhealthy(
                    ProviderReason::SecretNotFound,
                    format!("provider secret {}/{} not found", r.namespace, r.name),
                ),
                Err(e) => CredentialCheck::unhealthy(
                    ProviderReason::SecretGetError,
                    format!("failed to get provider secret {}/{}: {e}", r.namespace, r.name),
                ),
            }
        }
        AuthType::ExternalSecret => {
            let Some(es) = &auth.external_secret else {
                return CredentialCheck::unhealthy(
                    ProviderReason::InvalidConfig,
                    "spec.auth.externalSecret is required when spec.auth.type is externalSecret",
                );
            };
            if es.store.name.is_empty() {
                return CredentialCheck::unhealthy(
                    ProviderReason::InvalidConfig,
                    "spec.auth.externalSecret.store.name must not be empty",
                );
            }
            if es.remote_ref.key.is_empty() {
                return CredentialCheck::unhealthy(
                    ProviderReason::InvalidConfig,
                    "spec.auth.externalSecret.remoteRef.key must not be empty",
                );
            }
            CredentialCheck::healthy(
                ProviderReason::ExternalSecretConfigured,
                format!(
                    "ExternalSecret configured: {}/{} -> {}",
                    es.store.kind.as_str(),
                    es.store.name,
                    es.remote_ref.key
                ),
            )
        }
        AuthType::WorkloadIdentity => CredentialCheck::healthy(
            ProviderReason::WorkloadIdentityNotValidated,
            "workloadIdentity auth accepted without validation",
        ),
    }
}

async fn publish(
    ctx: &Context,
    provider: &CredentialProvider,
    type_: EventType,
    reason: &str,
    note: String,
) {
    ctx.events
        .publish(
            &provider.object_ref(&()),
            type_,
            reason,
            actions::VALIDATE,
            Some(note),
        )
        .await;
}
