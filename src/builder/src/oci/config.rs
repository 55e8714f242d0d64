//! Container configuration model (the image config blob).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use hoist_core::error::{HoistError, Result};

use super::digest::Digest;

/// Image configuration: platform, history, rootfs diff-ids and runtime config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    pub rootfs: RootFs,
    #[serde(default)]
    pub config: RuntimeConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ordered uncompressed-content digests, one per manifest layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<Digest>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// A single history record. Build-tool provenance only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Runtime defaults applied when a container starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "Env", default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Labels", default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(rename = "Cmd", default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerConfig {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialized config blob bytes. These exact bytes are digested and pushed.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Copy with build-time history stripped, ready for mutation.
    pub fn clean_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.history.clear();
        copy
    }

    /// Append a diff-id for a newly built layer.
    pub fn push_diff_id(&mut self, diff_id: Digest) {
        self.rootfs.diff_ids.push(diff_id);
    }

    /// Merge `KEY=VALUE` environment entries. Entries given later replace
    /// earlier ones with the same key; the replacement goes to the end.
    pub fn merge_env<'a, I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let env = self.config.env.get_or_insert_with(Vec::new);
        for (key, value) in vars {
            env.retain(|entry| env_key(entry) != key.as_str());
            env.push(format!("{}={}", key, value));
        }
    }

    /// Merge labels, overwriting existing keys.
    pub fn merge_labels<'a, I>(&mut self, labels: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let existing = self.config.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in labels {
            existing.insert(key.clone(), value.clone());
        }
    }

    /// Look up an environment variable value.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.config
            .env
            .as_ref()?
            .iter()
            .rev()
            .find(|entry| env_key(entry) == key)
            .map(|entry| entry.split_once('=').map(|(_, v)| v).unwrap_or(""))
    }

    /// Check that the manifest layer count matches the diff-id count.
    pub fn validate_alignment(&self, layer_count: usize) -> Result<()> {
        if self.rootfs.diff_ids.len() != layer_count {
            return Err(HoistError::Build(format!(
                "Manifest has {} layers but config lists {} diff_ids",
                layer_count,
                self.rootfs.diff_ids.len()
            )));
        }
        Ok(())
    }
}

fn env_key(entry: &str) -> &str {
    entry.split_once('=').map(|(k, _)| k).unwrap_or(entry)
}
