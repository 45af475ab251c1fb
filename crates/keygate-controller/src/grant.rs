//! CredentialGrant reconciler
//!
//! Each pass walks the grant through its lifecycle:
//!
//! 1. Deleting grants run strategy cleanup, then drop the finalizer
//! 2. Grants without the finalizer get it and are requeued immediately
//! 3. The referenced CredentialProvider must exist
//! 4. The grant's namespace must pass the provider's namespace selector
//! 5. Every requested capability must be on the provider's allow-list
//! 6. The provider's auth type must have a strategy
//! 7. The strategy provisions the artifact Secret
//!
//! Failures at steps 3-7 are recorded on the `Ready` condition; the grant
//! is requeued only when the failure can clear without an edit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use keygate_common::crd::{
    conditions_equivalent, set_condition, ArtifactReference, Condition, ConditionStatus,
    CredentialGrant, CredentialGrantSpec, CredentialGrantStatus, CredentialProvider,
    CredentialProviderSpec, GrantConditionType, GrantReason, GrantState,
};
use keygate_common::duration::parse_optional;
use keygate_common::events::{actions, reasons};
use keygate_common::metrics::{self, ProvisioningResult, ReconcileTimer};
use keygate_common::{ReconcileError, GRANT_FINALIZER};
use keygate_provisioner::{ProvisionError, ProvisionResult, Strategy};

use crate::context::Context;

/// Requeue delay while the referenced provider does not exist
pub const REQUEUE_PROVIDER_MISSING: Duration = Duration::from_secs(30);

/// Requeue delay after a failed provisioning attempt
pub const REQUEUE_PROVISION_FAILED: Duration = Duration::from_secs(30);

/// Requeue delay for auth types without a strategy
pub const REQUEUE_STRATEGY_UNSUPPORTED: Duration = Duration::from_secs(300);

/// Requeue delay applied by [`error_policy`]
pub const REQUEUE_ERROR: Duration = Duration::from_secs(30);

/// Longest wait between passes while a rotation is pending
///
/// kube-runtime's scheduler rejects deadlines past roughly two years; each
/// pass recomputes the remaining time from `nextRotation`.
pub const MAX_ROTATION_REQUEUE: Duration = Duration::from_secs(24 * 60 * 60);

/// Rotation interval in force for a grant
///
/// The grant's own interval wins when it parses; otherwise the provider's
/// apiKey rotation interval applies when rotation is enabled. Zero means
/// the grant is never rotated on a timer.
pub fn effective_rotation_interval(
    grant: &CredentialGrantSpec,
    provider: &CredentialProviderSpec,
) -> Duration {
    parse_optional(grant.rotation_interval())
        .or_else(|| parse_optional(provider.rotation_interval()))
        .unwrap_or(Duration::ZERO)
}

/// Reconcile a CredentialGrant
#[instrument(
    skip(grant, ctx),
    fields(
        grant = %grant.name_any(),
        namespace = %grant.namespace().unwrap_or_default(),
        provider = %grant.spec.provider_ref.name,
    )
)]
pub async fn reconcile(
    grant: Arc<CredentialGrant>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let timer = ReconcileTimer::start("credential_grant");
    let result = reconcile_grant(&grant, &ctx).await;
    match &result {
        Ok(_) => timer.success(),
        Err(e) => timer.error(e.kind()),
    }
    result
}

/// Log the failure and retry after [`REQUEUE_ERROR`]
pub fn error_policy(
    grant: Arc<CredentialGrant>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        grant = %grant.name_any(),
        namespace = %grant.namespace().unwrap_or_default(),
        "CredentialGrant reconciliation failed"
    );
    Action::requeue(REQUEUE_ERROR)
}

async fn reconcile_grant(grant: &CredentialGrant, ctx: &Context) -> Result<Action, ReconcileError> {
    let name = grant.name_any();
    let namespace = grant
        .namespace()
        .ok_or_else(|| ReconcileError::Validation(format!("CredentialGrant {name} has no namespace")))?;

    if grant.metadata.deletion_timestamp.is_some() {
        return handle_deletion(grant, ctx, &namespace).await;
    }

    if !has_finalizer(grant) {
        info!("Adding cleanup finalizer");
        ctx.kube
            .add_grant_finalizer(&namespace, &name, GRANT_FINALIZER)
            .await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let provider_name = grant.spec.provider_ref.name.as_str();
    let Some(provider) = ctx.kube.get_provider(provider_name).await? else {
        reject(
            grant,
            ctx,
            &namespace,
            GrantReason::DeclarationNotFound,
            format!("CredentialProvider {provider_name} not found"),
        )
        .await?;
        return Ok(Action::requeue(REQUEUE_PROVIDER_MISSING));
    };

    // A namespace that cannot be read is treated as not allowed
    let admitted = ctx
        .kube
        .get_namespace_labels(&namespace)
        .await?
        .is_some_and(|labels| provider.spec.admits_namespace(&labels));
    if !admitted {
        reject(
            grant,
            ctx,
            &namespace,
            GrantReason::NamespaceNotAllowed,
            format!("namespace {namespace} is not allowed by CredentialProvider {provider_name}"),
        )
        .await?;
        return Ok(Action::await_change());
    }

    let disallowed = provider.spec.disallowed_capabilities(&grant.spec.capabilities);
    if !disallowed.is_empty() {
        reject(
            grant,
            ctx,
            &namespace,
            GrantReason::CapabilityNotAllowed,
            format!(
                "capabilities [{}] are not allowed by CredentialProvider {provider_name} (allowed: [{}])",
                disallowed.join(", "),
                provider.spec.allowed_capabilities.join(", ")
            ),
        )
        .await?;
        return Ok(Action::await_change());
    }

    let Some(strategy) = ctx.strategy_for(&provider) else {
        reject(
            grant,
            ctx,
            &namespace,
            GrantReason::StrategyUnsupported,
            format!(
                "auth type {} has no provisioning strategy",
                provider.spec.auth.type_.as_str()
            ),
        )
        .await?;
        return Ok(Action::requeue(REQUEUE_STRATEGY_UNSUPPORTED));
    };

    match strategy.provision(&provider, grant).await {
        Ok(result) => on_provisioned(grant, ctx, &namespace, &provider, &strategy, result).await,
        Err(e) => on_provision_failed(grant, ctx, &namespace, e).await,
    }
}

fn has_finalizer(grant: &CredentialGrant) -> bool {
    grant.finalizers().iter().any(|f| f == GRANT_FINALIZER)
}

async fn handle_deletion(
    grant: &CredentialGrant,
    ctx: &Context,
    namespace: &str,
) -> Result<Action, ReconcileError> {
    if !has_finalizer(grant) {
        return Ok(Action::await_change());
    }

    let strategy = match ctx.kube.get_provider(&grant.spec.provider_ref.name).await? {
        Some(provider) => ctx.strategy_for(&provider),
        None => {
            debug!("Provider gone, deleting artifact Secret directly");
            Some(ctx.fallback_strategy())
        }
    };

    if let Some(strategy) = strategy {
        if let Err(e) = strategy.cleanup(grant).await {
            let message = e.to_string();
            warn!(error = %message, "Artifact cleanup failed, keeping finalizer");
            publish(ctx, grant, EventType::Warning, reasons::CLEANUP_FAILED, actions::CLEANUP, message)
                .await;
            return Err(keygate_common::Error::from(e).into());
        }
        publish(
            ctx,
            grant,
            EventType::Normal,
            reasons::CLEANUP_COMPLETE,
            actions::CLEANUP,
            format!("Secret {namespace}/{} removed", grant.spec.secret_name),
        )
        .await;
    }

    info!("Removing cleanup finalizer");
    ctx.kube
        .remove_grant_finalizer(namespace, &grant.name_any(), GRANT_FINALIZER)
        .await?;
    Ok(Action::await_change())
}

/// Record a `Ready=False` outcome that happened before provisioning
async fn reject(
    grant: &CredentialGrant,
    ctx: &Context,
    namespace: &str,
    reason: GrantReason,
    message: String,
) -> Result<(), ReconcileError> {
    warn!(reason = %reason, %message, "CredentialGrant not ready");

    let mut status = grant.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        condition(grant, GrantConditionType::Ready, false, reason, &message),
    );
    let changed = update_status(grant, ctx, namespace, status).await?;

    if changed {
        let action = if reason.is_permanent() {
            actions::VALIDATE
        } else {
            actions::RECONCILE
        };
        publish(ctx, grant, EventType::Warning, reason.as_str(), action, message).await;
    }
    metrics::record_grant_status(&grant.spec.provider_ref.name, namespace, false);
    Ok(())
}

async fn on_provision_failed(
    grant: &CredentialGrant,
    ctx: &Context,
    namespace: &str,
    err: ProvisionError,
) -> Result<Action, ReconcileError> {
    let provider_name = grant.spec.provider_ref.name.as_str();
    let message = err.to_string();
    warn!(error = %message, retryable = err.is_retryable(), "Provisioning failed");

    metrics::record_provisioning(provider_name, namespace, ProvisioningResult::Failure);
    metrics::record_rotation_error(
        provider_name,
        namespace,
        if err.is_retryable() { "transient" } else { "permanent" },
    );

    let mut status = grant.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        condition(
            grant,
            GrantConditionType::CredentialProvisioned,
            false,
            GrantReason::ProvisioningFailed,
            &message,
        ),
    );
    set_condition(
        &mut status.conditions,
        condition(grant, GrantConditionType::Ready, false, GrantReason::ProvisioningFailed, &message),
    );

    if update_status(grant, ctx, namespace, status).await? {
        publish(
            ctx,
            grant,
            EventType::Warning,
            reasons::PROVISIONING_FAILED,
            actions::PROVISION,
            message,
        )
        .await;
    }
    metrics::record_grant_status(provider_name, namespace, false);

    Ok(Action::requeue(REQUEUE_PROVISION_FAILED))
}

async fn on_provisioned(
    grant: &CredentialGrant,
    ctx: &Context,
    namespace: &str,
    provider: &CredentialProvider,
    strategy: &Strategy,
    result: ProvisionResult,
) -> Result<Action, ReconcileError> {
    let provider_name = provider.name_any();
    let now = Utc::now();
    let interval = effective_rotation_interval(&grant.spec, &provider.spec);
    let previous = grant.status.clone().unwrap_or_default();

    // lastRotation only moves on first provision or when a rotation is due
    let rotation_due = previous.next_rotation.is_some_and(|next| next <= now);
    let last_rotation = match previous.last_rotation {
        Some(last) if !rotation_due => last,
        _ => now,
    };
    if rotation_due {
        info!(secret = %result.secret_name, "Credential rotated");
        metrics::record_rotation(&provider_name, namespace);
    }
    if result.needs_rotation {
        info!(secret = %result.secret_name, "Artifact is older than the rotation check age");
    }
    let next_rotation = next_rotation_after(last_rotation, interval);

    let mut status = previous;
    status.secret_ref = Some(ArtifactReference {
        kind: "Secret".to_string(),
        namespace: result.secret_namespace.clone(),
        name: result.secret_name.clone(),
    });
    status.last_rotation = Some(last_rotation);
    status.next_rotation = next_rotation;
    status.granted_capabilities = grant.spec.capabilities.clone();
    set_condition(
        &mut status.conditions,
        condition(
            grant,
            GrantConditionType::CredentialProvisioned,
            true,
            GrantReason::ArtifactProvisioned,
            &format!("Secret {}/{} provisioned", result.secret_namespace, result.secret_name),
        ),
    );
    set_condition(
        &mut status.conditions,
        condition(
            grant,
            GrantConditionType::Ready,
            true,
            GrantReason::CredentialReady,
            "credential is ready for injection",
        ),
    );

    let was_ready = grant.state() == GrantState::Ready;
    if update_status(grant, ctx, namespace, status).await? && !was_ready {
        publish(
            ctx,
            grant,
            EventType::Normal,
            reasons::CREDENTIAL_READY,
            actions::PROVISION,
            format!("Secret {}/{} is ready", result.secret_namespace, result.secret_name),
        )
        .await;
    }

    metrics::record_provisioning(&provider_name, namespace, ProvisioningResult::Success);
    metrics::record_grant_status(&provider_name, namespace, true);
    metrics::record_credential_timing(
        &provider_name,
        namespace,
        &grant.name_any(),
        seconds_between(last_rotation, now),
        next_rotation.map(|next| seconds_between(now, next)),
    );

    report_health(strategy, provider, grant).await;

    Ok(requeue_for_rotation(interval, next_rotation, now))
}

fn next_rotation_after(last: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    if interval.is_zero() {
        return None;
    }
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| last.checked_add_signed(d))
}

/// Wake up when the next rotation is due, never later than one interval
/// or [`MAX_ROTATION_REQUEUE`]
fn requeue_for_rotation(
    interval: Duration,
    next_rotation: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Action {
    let Some(next) = next_rotation else {
        return Action::await_change();
    };
    let remaining = (next - now).to_std().unwrap_or(Duration::ZERO);
    Action::requeue(remaining.min(interval).min(MAX_ROTATION_REQUEUE))
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

async fn report_health(strategy: &Strategy, provider: &CredentialProvider, grant: &CredentialGrant) {
    match strategy.health_check(provider, grant).await {
        Ok(report) => {
            if !report.healthy {
                warn!(message = %report.message, "Artifact health check failed");
            }
            for warning in &report.warnings {
                warn!(%warning, "Artifact health warning");
            }
        }
        Err(e) => warn!(error = %e, "Artifact health check errored"),
    }
}

fn condition(
    grant: &CredentialGrant,
    type_: GrantConditionType,
    ready: bool,
    reason: GrantReason,
    message: &str,
) -> Condition {
    Condition::new(
        type_.as_str(),
        ConditionStatus::from(ready),
        reason.as_str(),
        message,
    )
    .with_generation(grant.metadata.generation)
}

/// Patch status unless it only differs in timestamps; returns whether a write happened
async fn update_status(
    grant: &CredentialGrant,
    ctx: &Context,
    namespace: &str,
    status: CredentialGrantStatus,
) -> Result<bool, ReconcileError> {
    if grant
        .status
        .as_ref()
        .is_some_and(|current| status_equivalent(current, &status))
    {
        debug!("Status unchanged, skipping update");
        return Ok(false);
    }

    ctx.kube
        .patch_grant_status(namespace, &grant.name_any(), &status)
        .await?;
    Ok(true)
}

fn status_equivalent(a: &CredentialGrantStatus, b: &CredentialGrantStatus) -> bool {
    conditions_equivalent(&a.conditions, &b.conditions)
        && a.secret_ref == b.secret_ref
        && a.granted_capabilities == b.granted_capabilities
        && a.last_rotation == b.last_rotation
        && a.next_rotation == b.next_rotation
}

async fn publish(
    ctx: &Context,
    grant: &CredentialGrant,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&grant.object_ref(&()), type_, reason, action, Some(note))
        .await;
}
