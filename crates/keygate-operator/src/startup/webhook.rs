//! Admission webhook startup

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use kube::Client;

use keygate_webhook::{start_server, ServerConfig, WebhookState};

/// Load the serving certificate from disk and build the server config
pub fn load_server_config(
    addr: SocketAddr,
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<ServerConfig> {
    let read = |path: &Path| {
        std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))
    };

    Ok(ServerConfig {
        addr,
        cert_pem: read(cert_path)?,
        key_pem: read(key_path)?,
    })
}

/// Serve the admission webhooks in the background
///
/// A server failure is logged; controllers keep running.
pub fn spawn_webhook_server(config: ServerConfig, client: Client) {
    let state = Arc::new(WebhookState::new(client));
    tokio::spawn(async move {
        if let Err(e) = start_server(config, state).await {
            tracing::error!(error = %e, "Admission webhook server stopped");
        }
    });
}
