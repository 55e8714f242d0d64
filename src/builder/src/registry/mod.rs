//! Registry port.
//!
//! The layer assembler and tag resolver only talk to a registry through
//! [`RegistryPort`]. Two implementations ship with the crate:
//!
//! - [`HttpRegistry`]: the Distribution API v2 over HTTP(S)
//! - [`InMemoryRegistry`]: a content-addressed in-process store
//!
//! Every call is scoped to a repository. Transport failures and not-found
//! conditions are returned as errors; nothing here retries.

mod http;
mod memory;

use async_trait::async_trait;
use hoist_core::error::Result;

use crate::oci::{ContainerConfig, Digest, Manifest, RegistryCredentials};

pub use http::HttpRegistry;
pub use memory::{InMemoryRegistry, Operation};

/// Operations the builder needs from a container registry.
#[async_trait]
pub trait RegistryPort: Send + Sync {
    /// Fetch a manifest by tag or digest.
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest>;

    /// Fetch and parse the config blob a manifest points at.
    async fn get_container_config(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<ContainerConfig>;

    /// Whether a blob with this digest is present in the repository.
    async fn layer_exists(&self, repository: &str, digest: &Digest) -> Result<bool>;

    /// Server-side copy of a blob from one repository into another.
    ///
    /// Mounting a blob that is already present is a no-op.
    async fn mount_layer(
        &self,
        source_repository: &str,
        target_repository: &str,
        digest: &Digest,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()>;

    /// Upload a blob (layer or config) by digest.
    async fn push_layer(
        &self,
        blob: Vec<u8>,
        repository: &str,
        digest: &Digest,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()>;

    /// Store manifest bytes under a tag, replacing whatever the tag pointed at.
    async fn push_manifest(
        &self,
        manifest: &[u8],
        content_type: &str,
        repository: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()>;

    /// List the tags of a repository. A repository that does not exist has no tags.
    async fn get_tags(&self, repository: &str) -> Result<Vec<String>>;
}
