//! CRD installation and rendering
//!
//! The operator installs its own CRDs on startup using server-side apply so
//! the installed schema always matches the running binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use keygate_common::crd::{CredentialGrant, CredentialProvider};
use keygate_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn keygate_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "credentialproviders.keygate.dev",
            crd: CredentialProvider::crd(),
        },
        CrdDef {
            name: "credentialgrants.keygate.dev",
            crd: CredentialGrant::crd(),
        },
    ]
}

/// Ensure both keygate CRDs are installed
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in keygate_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("keygate CRDs installed/updated");
    Ok(())
}

/// Render both CRDs as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let docs = keygate_crds()
        .iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_generated_resources() {
        for def in keygate_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }

    #[test]
    fn manifests_hold_both_crds() {
        let yaml = crd_manifests().unwrap();
        let docs: Vec<CustomResourceDefinition> = yaml
            .split("---\n")
            .map(|doc| serde_yaml::from_str(doc).unwrap())
            .collect();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].spec.names.kind, "CredentialProvider");
        assert_eq!(docs[0].spec.scope, "Cluster");
        assert_eq!(docs[1].spec.names.kind, "CredentialGrant");
        assert_eq!(docs[1].spec.scope, "Namespaced");
    }
}
