//! CRD installation utilities
//!
//! Installs the operator's CRDs on startup using server-side apply.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use opensearch_common::crd::all_crds;
use opensearch_common::kube_utils::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: String,
    crd: CustomResourceDefinition,
}

fn crd_defs() -> anyhow::Result<Vec<CrdDef>> {
    all_crds()
        .into_iter()
        .map(|crd| {
            let name = crd
                .metadata
                .name
                .clone()
                .ok_or_else(|| anyhow::anyhow!("generated CRD has no name"))?;
            Ok(CrdDef { name, crd })
        })
        .collect()
}

/// All CRDs as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let documents = all_crds()
        .iter()
        .map(|crd| {
            serde_yaml::to_string(crd).map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(documents.join("---\n"))
}

/// Install or update every operator CRD
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing OpenSearch CRDs...");
    for def in crd_defs()? {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(&def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    tracing::info!("OpenSearch CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn every_crd_has_a_unique_name_in_the_api_group() {
        let defs = crd_defs().expect("names");
        let names: BTreeSet<_> = defs.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names.len(), defs.len());
        assert_eq!(defs.len(), 11);
        for name in &names {
            assert!(name.ends_with(".opensearch.opster.io"), "{name}");
        }
        assert!(names.contains("opensearchclusters.opensearch.opster.io"));
    }

    #[test]
    fn manifests_are_separated_documents() {
        let yaml = crd_manifests().expect("serialize");
        assert_eq!(yaml.matches("---\n").count(), 10);
        assert!(yaml.contains("kind: CustomResourceDefinition"));
    }
}
