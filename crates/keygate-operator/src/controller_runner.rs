//! Controller runner - builds the keygate controller futures
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! runs concurrently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use keygate_common::crd::{CredentialGrant, CredentialProvider};
use keygate_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_KEYGATE};
use keygate_controller::{grant, provider, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Label selector matching artifact Secrets written by keygate
fn managed_secret_selector() -> String {
    format!("{LABEL_MANAGED_BY}={LABEL_MANAGED_BY_KEYGATE}")
}

/// Build the CredentialGrant controller
///
/// Besides grants it watches owned artifact Secrets (only those labelled as
/// keygate-managed, so the cluster's other Secrets are not cached) and every
/// CredentialProvider, re-queueing the cached grants that reference a
/// changed provider.
pub fn build_grant_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    let grants: Api<CredentialGrant> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let providers: Api<CredentialProvider> = Api::all(client);

    let controller = Controller::new(grants, watcher_config());
    let store = controller.store();

    tracing::info!("- CredentialGrant controller");

    vec![Box::pin(
        controller
            .owns(secrets, watcher_config().labels(&managed_secret_selector()))
            .watches(providers, watcher_config(), move |provider| {
                let affected = grants_for_provider(&store.state(), &provider.name_any());
                tracing::debug!(
                    provider = %provider.name_any(),
                    affected_count = affected.len(),
                    "CredentialProvider changed, triggering re-reconciliation of grants"
                );
                affected
            })
            .shutdown_on_signal()
            .run(grant::reconcile, grant::error_policy, ctx)
            .for_each(log_reconcile_result("CredentialGrant")),
    )]
}

/// Build the CredentialProvider controller
pub fn build_provider_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    let providers: Api<CredentialProvider> = Api::all(client);

    tracing::info!("- CredentialProvider controller");

    vec![Box::pin(
        Controller::new(providers, watcher_config())
            .shutdown_on_signal()
            .run(provider::reconcile, provider::error_policy, ctx)
            .for_each(log_reconcile_result("CredentialProvider")),
    )]
}

/// References to the grants naming `provider` in their providerRef
fn grants_for_provider(
    grants: &[Arc<CredentialGrant>],
    provider: &str,
) -> Vec<ObjectRef<CredentialGrant>> {
    grants
        .iter()
        .filter(|g| g.spec.provider_ref.name == provider)
        .map(|g| ObjectRef::from_obj(g.as_ref()))
        .collect()
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
