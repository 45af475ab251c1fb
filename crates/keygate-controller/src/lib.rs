//! keygate reconcilers
//!
//! - [`grant`]: drives each CredentialGrant to a provisioned artifact
//! - [`provider`]: checks each CredentialProvider's master credential

#![deny(missing_docs)]

pub mod client;
pub mod context;
pub mod grant;
pub mod provider;

#[cfg(test)]
mod fixtures;

pub use client::{KubeClient, KubeClientImpl};
pub use context::{Context, ContextBuilder};
