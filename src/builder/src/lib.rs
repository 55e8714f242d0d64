//! Hoist Builder - daemonless container image assembly and publishing.
//!
//! Builds images directly against a registry's HTTP API: base image layers are
//! mounted into the target repository, application content is packed into new
//! layers, manifest and config are rewritten, and the result is pushed under
//! the tags the resolver allows.
//!
//! - [`oci`]: digests, references, manifest/config models, credentials
//! - [`registry`]: the registry port with HTTP and in-memory implementations
//! - [`build`]: layer packing and the Pull/Build/Push assembler
//! - [`tag`]: version identity and floating tag resolution
//! - [`pipeline`]: the end-to-end publish flow

pub mod build;
pub mod oci;
pub mod pipeline;
pub mod registry;
pub mod tag;

pub use build::{BuildConfig, BuildOutput, LayerAssembler, PackedLayer, PushReport};
pub use oci::{ContainerConfig, Digest, ImageReference, Manifest, RegistryCredentials};
pub use pipeline::{publish, PublishReport};
pub use registry::{HttpRegistry, InMemoryRegistry, RegistryPort};
pub use tag::{BaseImage, ResolvedTags, TagResolver, VersionModel};
