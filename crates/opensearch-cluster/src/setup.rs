//! Per-reconcile state shared between stages
//!
//! Stages run in a fixed order. The configuration and TLS stages publish
//! volumes, mounts and opensearch.yml settings here; the nodes and
//! dashboards stages read them when building pod templates.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Volume, VolumeMount};
use serde_yaml::{Mapping, Value};

use opensearch_common::kube_utils::sha1_hex;
use opensearch_common::Error;
use opensearch_pki::CertificateAuthority;

/// Engine configuration directory
pub const CONFIG_DIR: &str = "/usr/share/opensearch/config";
/// Engine data directory
pub const DATA_DIR: &str = "/usr/share/opensearch/data";
/// Engine log directory
pub const LOGS_DIR: &str = "/usr/share/opensearch/logs";
/// Engine plugin directory
pub const PLUGINS_DIR: &str = "/usr/share/opensearch/plugins";

/// A writable directory seeded from the image at pod start
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WritableDir {
    /// emptyDir volume backing the directory
    pub volume: String,
    /// Path in the image whose contents are copied in
    pub source: String,
}

/// Volumes and settings gathered for the node pods
#[derive(Clone, Debug, Default)]
pub struct NodeSetup {
    /// Extra pod volumes
    pub volumes: Vec<Volume>,
    /// Extra engine container mounts
    pub mounts: Vec<VolumeMount>,
    /// opensearch.yml keys
    pub settings: BTreeMap<String, Value>,
    /// emptyDir volumes populated from the image by an init container
    pub writable_dirs: Vec<WritableDir>,
    /// Plugins installed before the engine starts
    pub plugins: Vec<String>,
    /// Cluster CA when any certificate is generated
    pub ca: Option<CertificateAuthority>,
}

impl NodeSetup {
    /// Add a volume mounted into the engine container
    pub fn add_volume(&mut self, volume: Volume, mount: VolumeMount) {
        if self.volumes.iter().any(|v| v.name == volume.name) {
            return;
        }
        self.volumes.push(volume);
        self.mounts.push(mount);
    }

    /// Set an opensearch.yml key; returns the value it replaced
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.settings.insert(key.into(), value.into())
    }

    /// Set a key from YAML source text, as written by users
    ///
    /// Text that does not parse as YAML is kept as a plain string.
    pub fn set_yaml(&mut self, key: impl Into<String>, source: &str) -> Option<Value> {
        let value = serde_yaml::from_str::<Value>(source)
            .unwrap_or_else(|_| Value::String(source.to_string()));
        self.set(key, value)
    }

    /// opensearch.yml rendered with keys in sorted order
    pub fn render(&self) -> Result<String, Error> {
        render_settings("opensearch.yml", &self.settings)
    }

    /// SHA-1 of the rendered opensearch.yml
    pub fn checksum(&self) -> Result<String, Error> {
        Ok(sha1_hex(self.render()?))
    }
}

/// Render flat dotted-key settings as a YAML document
pub fn render_settings(file: &str, settings: &BTreeMap<String, Value>) -> Result<String, Error> {
    let document: Mapping = settings
        .iter()
        .map(|(k, v)| (Value::String(k.clone()), v.clone()))
        .collect();
    serde_yaml::to_string(&document).map_err(|e| Error::serialization(format!("{}: {}", file, e)))
}

/// A YAML sequence of strings
pub fn yaml_list<S: AsRef<str>>(items: &[S]) -> Value {
    Value::Sequence(
        items
            .iter()
            .map(|s| Value::String(s.as_ref().to_string()))
            .collect(),
    )
}
