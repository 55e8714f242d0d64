//! Image metadata and addressing.
//!
//! - Content digests (`sha256:<hex>`) for blobs and diff-ids
//! - Image references (`registry/repository:tag`)
//! - Schema 2 manifest and container config models
//! - Static registry credentials

pub mod config;
pub mod credentials;
pub mod digest;
pub mod manifest;
pub mod reference;

pub use config::{ContainerConfig, HistoryEntry, RootFs, RuntimeConfig};
pub use credentials::RegistryCredentials;
pub use digest::Digest;
pub use manifest::{Descriptor, Manifest};
pub use reference::ImageReference;
