//! Startup utilities for the keygate operator

mod crds;
mod webhook;

pub use crds::{crd_manifests, ensure_crds_installed};
pub use webhook::{load_server_config, spawn_webhook_server};
