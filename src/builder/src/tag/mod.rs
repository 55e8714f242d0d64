//! Version identity and tag resolution.

mod resolver;
mod version;

pub use resolver::{resolve_tags, ResolvedTags, TagResolver};
pub use version::{sanitize_tag, BaseImage, VersionModel};
