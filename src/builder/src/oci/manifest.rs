//! Image manifest model.
//!
//! Single-platform schema 2 manifests in either the Docker or the OCI media
//! type flavor. Fields the builder does not touch (annotations, descriptor
//! urls, ...) are carried through untouched so a pulled manifest serializes
//! back to the shape the registry expects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use hoist_core::error::{HoistError, Result};

use super::digest::Digest;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONTAINER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Media types sent in the `Accept` header when fetching a manifest.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[DOCKER_MANIFEST_V2, OCI_MANIFEST];

/// Content descriptor: media type, size and digest of a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: Digest,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, size: u64, digest: Digest) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest,
            extra: Map::new(),
        }
    }
}

/// Schema 2 image manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    /// Layers in bottom-to-top overlay order. Never reordered.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Parse manifest bytes as returned by a registry.
    ///
    /// Manifest lists, image indexes and schema 1 manifests are rejected.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(data)?;

        let schema_version = value.get("schemaVersion").and_then(Value::as_u64);
        if schema_version != Some(2) {
            return Err(HoistError::Other(format!(
                "Unsupported manifest schema version: {:?}",
                schema_version
            )));
        }

        if let Some(media_type) = value.get("mediaType").and_then(Value::as_str) {
            if media_type == DOCKER_MANIFEST_LIST || media_type == OCI_INDEX {
                return Err(HoistError::Other(format!(
                    "Multi-platform manifests are not supported ({})",
                    media_type
                )));
            }
        }
        if value.get("manifests").is_some() {
            return Err(HoistError::Other(
                "Multi-platform manifests are not supported".to_string(),
            ));
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Whether this manifest uses OCI media types (otherwise Docker schema 2).
    pub fn is_oci(&self) -> bool {
        match self.media_type.as_deref() {
            Some(media_type) => media_type == OCI_MANIFEST,
            None => self.config.media_type == OCI_CONFIG,
        }
    }

    /// Media type of the manifest itself, for the `Content-Type` of a push.
    pub fn content_type(&self) -> &str {
        match self.media_type.as_deref() {
            Some(media_type) => media_type,
            None if self.is_oci() => OCI_MANIFEST,
            None => DOCKER_MANIFEST_V2,
        }
    }

    /// Layer media type for newly built layers, matching the manifest flavor.
    pub fn layer_media_type(&self) -> &'static str {
        if self.is_oci() {
            OCI_LAYER_GZIP
        } else {
            DOCKER_LAYER_GZIP
        }
    }

    /// Copy of this manifest ready to be extended with new layers.
    ///
    /// The base layer list is kept as is; only the config descriptor will be
    /// replaced once the mutated config is serialized.
    pub fn clean_copy(&self) -> Self {
        self.clone()
    }

    /// Append a newly built layer on top of the existing ones.
    pub fn push_layer(&mut self, size: u64, digest: Digest) {
        let media_type = self.layer_media_type();
        self.layers.push(Descriptor::new(media_type, size, digest));
    }

    /// Point the manifest at a new config blob.
    pub fn set_config(&mut self, size: u64, digest: Digest) {
        self.config.size = size;
        self.config.digest = digest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::digest::digest_of_bytes;

    const DOCKER_MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1234,
            "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        },
        "layers": [
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 100,
                "digest": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
            }
        ]
    }"#;

    #[test]
    fn test_parse_docker_manifest() {
        let manifest = Manifest::from_slice(DOCKER_MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.config.size, 1234);
        assert!(!manifest.is_oci());
        assert_eq!(manifest.layer_media_type(), DOCKER_LAYER_GZIP);
        assert_eq!(manifest.content_type(), DOCKER_MANIFEST_V2);
    }

    #[test]
    fn test_parse_oci_manifest_without_media_type() {
        let json = DOCKER_MANIFEST
            .replace(
                "\"mediaType\": \"application/vnd.docker.distribution.manifest.v2+json\",",
                "",
            )
            .replace(DOCKER_CONTAINER_CONFIG, OCI_CONFIG);
        let manifest = Manifest::from_slice(json.as_bytes()).unwrap();
        assert!(manifest.media_type.is_none());
        assert!(manifest.is_oci());
        assert_eq!(manifest.content_type(), OCI_MANIFEST);
        assert_eq!(manifest.layer_media_type(), OCI_LAYER_GZIP);
    }

    #[test]
    fn test_reject_manifest_list() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": []
        }"#;
        assert!(Manifest::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_reject_schema1() {
        let json = r#"{"schemaVersion": 1, "name": "x", "tag": "y", "fsLayers": []}"#;
        assert!(Manifest::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let json = DOCKER_MANIFEST.replacen(
            "\"schemaVersion\": 2,",
            "\"schemaVersion\": 2, \"annotations\": {\"org.example\": \"yes\"},",
            1,
        );
        let manifest = Manifest::from_slice(json.as_bytes()).unwrap();
        let out: Value = serde_json::from_slice(&manifest.to_vec().unwrap()).unwrap();
        assert_eq!(out["annotations"]["org.example"], "yes");
        assert_eq!(out["schemaVersion"], 2);
        assert_eq!(out["config"]["mediaType"], DOCKER_CONTAINER_CONFIG);
    }

    #[test]
    fn test_push_layer_appends_in_order() {
        let mut manifest = Manifest::from_slice(DOCKER_MANIFEST.as_bytes())
            .unwrap()
            .clean_copy();
        let first = digest_of_bytes(b"first");
        let second = digest_of_bytes(b"second");
        manifest.push_layer(10, first.clone());
        manifest.push_layer(20, second.clone());

        assert_eq!(manifest.layers.len(), 3);
        assert_eq!(manifest.layers[1].digest, first);
        assert_eq!(manifest.layers[2].digest, second);
        assert_eq!(manifest.layers[2].media_type, DOCKER_LAYER_GZIP);
    }

    #[test]
    fn test_set_config() {
        let mut manifest = Manifest::from_slice(DOCKER_MANIFEST.as_bytes()).unwrap();
        let digest = digest_of_bytes(b"config");
        manifest.set_config(42, digest.clone());
        assert_eq!(manifest.config.size, 42);
        assert_eq!(manifest.config.digest, digest);
        assert_eq!(manifest.config.media_type, DOCKER_CONTAINER_CONFIG);
    }
}
