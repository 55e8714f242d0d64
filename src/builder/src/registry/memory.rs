//! In-memory registry.
//!
//! Content-addressed blob and manifest storage per repository, with call
//! counters and failure injection so the assembler's registry traffic can be
//! asserted on.

use std::collections::HashMap;

use async_trait::async_trait;
use hoist_core::error::{HoistError, Result};
use parking_lot::Mutex;

use super::RegistryPort;
use crate::oci::config::{ContainerConfig, RootFs, RuntimeConfig};
use crate::oci::digest::{digest_of_bytes, digest_of_decompressed_tar};
use crate::oci::manifest::{
    Descriptor, Manifest, DOCKER_CONTAINER_CONFIG, DOCKER_LAYER_GZIP, DOCKER_MANIFEST_V2,
};
use crate::oci::{Digest, RegistryCredentials};

/// Registry operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetManifest,
    GetContainerConfig,
    LayerExists,
    MountLayer,
    PushLayer,
    PushManifest,
    GetTags,
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, HashMap<Digest, Vec<u8>>>,
    manifests: HashMap<String, HashMap<String, Vec<u8>>>,
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, usize>,
}

/// Registry held entirely in process memory.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob and return its digest.
    pub fn insert_blob(&self, repository: &str, data: Vec<u8>) -> Digest {
        let digest = digest_of_bytes(&data);
        self.state
            .lock()
            .blobs
            .entry(repository.to_string())
            .or_default()
            .insert(digest.clone(), data);
        digest
    }

    /// Store manifest bytes under a tag.
    pub fn insert_manifest(&self, repository: &str, tag: &str, manifest: Vec<u8>) {
        self.state
            .lock()
            .manifests
            .entry(repository.to_string())
            .or_default()
            .insert(tag.to_string(), manifest);
    }

    /// Seed a complete single-platform image from gzip-compressed layer blobs.
    pub fn insert_image(
        &self,
        repository: &str,
        tag: &str,
        layers: &[Vec<u8>],
        runtime: RuntimeConfig,
    ) -> Result<Manifest> {
        let mut diff_ids = Vec::with_capacity(layers.len());
        let mut descriptors = Vec::with_capacity(layers.len());
        for (i, layer) in layers.iter().enumerate() {
            diff_ids.push(digest_of_decompressed_tar(&layer[..], &format!("layer {}", i))?);
            let digest = self.insert_blob(repository, layer.clone());
            descriptors.push(Descriptor::new(DOCKER_LAYER_GZIP, layer.len() as u64, digest));
        }

        let config = ContainerConfig {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            created: Some("2024-01-01T00:00:00Z".to_string()),
            history: Vec::new(),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids,
            },
            config: runtime,
            extra: Default::default(),
        };
        let config_bytes = config.to_vec()?;
        let config_size = config_bytes.len() as u64;
        let config_digest = self.insert_blob(repository, config_bytes);

        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(DOCKER_MANIFEST_V2.to_string()),
            config: Descriptor::new(DOCKER_CONTAINER_CONFIG, config_size, config_digest),
            layers: descriptors,
            extra: Default::default(),
        };
        self.insert_manifest(repository, tag, manifest.to_vec()?);
        Ok(manifest)
    }

    /// Make the next `count` calls of `operation` fail with a transport error.
    pub fn fail_next(&self, operation: Operation, count: usize) {
        self.state.lock().failures.insert(operation, count);
    }

    /// Number of times `operation` has been called.
    pub fn calls(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn blob(&self, repository: &str, digest: &Digest) -> Option<Vec<u8>> {
        self.state
            .lock()
            .blobs
            .get(repository)
            .and_then(|blobs| blobs.get(digest))
            .cloned()
    }

    pub fn has_blob(&self, repository: &str, digest: &Digest) -> bool {
        self.blob(repository, digest).is_some()
    }

    pub fn manifest(&self, repository: &str, tag: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .manifests
            .get(repository)
            .and_then(|tags| tags.get(tag))
            .cloned()
    }

    /// Record a call and consume an injected failure, if any.
    fn begin(&self, operation: Operation, repository: &str) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        if let Some(remaining) = state.failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HoistError::transport(
                    format!("{:?}", operation),
                    repository,
                    "injected failure",
                ));
            }
        }
        Ok(())
    }

    fn not_found(repository: &str, reference: impl std::fmt::Display) -> HoistError {
        HoistError::NotFound {
            repository: repository.to_string(),
            reference: reference.to_string(),
        }
    }
}

#[async_trait]
impl RegistryPort for InMemoryRegistry {
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        self.begin(Operation::GetManifest, repository)?;
        let state = self.state.lock();
        let tags = state
            .manifests
            .get(repository)
            .ok_or_else(|| Self::not_found(repository, reference))?;

        let data = match tags.get(reference) {
            Some(data) => data,
            None => tags
                .values()
                .find(|data| digest_of_bytes(data).to_string() == reference)
                .ok_or_else(|| Self::not_found(repository, reference))?,
        };
        Manifest::from_slice(data)
    }

    async fn get_container_config(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<ContainerConfig> {
        self.begin(Operation::GetContainerConfig, repository)?;
        let data = self
            .blob(repository, digest)
            .ok_or_else(|| Self::not_found(repository, digest))?;
        ContainerConfig::from_slice(&data)
    }

    async fn layer_exists(&self, repository: &str, digest: &Digest) -> Result<bool> {
        self.begin(Operation::LayerExists, repository)?;
        Ok(self.has_blob(repository, digest))
    }

    async fn mount_layer(
        &self,
        source_repository: &str,
        target_repository: &str,
        digest: &Digest,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        self.begin(Operation::MountLayer, target_repository)?;
        if self.has_blob(target_repository, digest) {
            return Ok(());
        }
        let data = self
            .blob(source_repository, digest)
            .ok_or_else(|| Self::not_found(source_repository, digest))?;
        self.insert_blob(target_repository, data);
        Ok(())
    }

    async fn push_layer(
        &self,
        blob: Vec<u8>,
        repository: &str,
        digest: &Digest,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        self.begin(Operation::PushLayer, repository)?;
        let actual = digest_of_bytes(&blob);
        if &actual != digest {
            return Err(HoistError::DigestMismatch {
                subject: format!("blob upload to {}", repository),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        self.insert_blob(repository, blob);
        Ok(())
    }

    async fn push_manifest(
        &self,
        manifest: &[u8],
        _content_type: &str,
        repository: &str,
        tag: &str,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        self.begin(Operation::PushManifest, repository)?;
        let parsed = Manifest::from_slice(manifest)?;
        let referenced = std::iter::once(&parsed.config).chain(parsed.layers.iter());
        for descriptor in referenced {
            if !self.has_blob(repository, &descriptor.digest) {
                return Err(HoistError::transport(
                    "PUT manifest",
                    repository,
                    format!("MANIFEST_BLOB_UNKNOWN {}", descriptor.digest),
                ));
            }
        }
        self.insert_manifest(repository, tag, manifest.to_vec());
        Ok(())
    }

    async fn get_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.begin(Operation::GetTags, repository)?;
        let mut tags: Vec<String> = self
            .state
            .lock()
            .manifests
            .get(repository)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        Ok(tags)
    }
}
