//! Image reference parsing.
//!
//! Parses references like `registry.internal:5000/base/wingnut:1.0.2` into
//! registry, repository and tag/digest components.

use hoist_core::error::{HoistError, Result};

/// Default registry when none is specified and no fallback is given.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, optionally with port
    pub registry: String,
    /// Repository path (e.g., "base/wingnut")
    pub repository: String,
    /// Tag (e.g., "1.0.2")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference, falling back to Docker Hub when it names no registry.
    pub fn parse(reference: &str) -> Result<Self> {
        Self::parse_in(reference, DEFAULT_REGISTRY)
    }

    /// Parse a reference, using `default_registry` when it names no registry.
    ///
    /// - `wingnut` → `<default>/wingnut:latest` (`docker.io/library/wingnut` on Docker Hub)
    /// - `base/wingnut:1.0` → `<default>/base/wingnut:1.0`
    /// - `host:5000/base/wingnut@sha256:...` → digest reference on `host:5000`
    pub fn parse_in(reference: &str, default_registry: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(HoistError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(HoistError::InvalidReference(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag colon can only appear after the last slash; a colon before it is a port.
        let last_segment_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let split = last_segment_start + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if matches!(tag.as_deref(), Some("")) {
            return Err(HoistError::InvalidReference(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        let (registry, repository) = split_registry_repository(name, default_registry)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The tag or digest to request the manifest by. Digest wins when both are set.
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Last path component of the repository (e.g., "wingnut" for "base/wingnut").
    pub fn short_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a name into registry and repository components.
///
/// The first component is a registry when it contains a dot or colon, or is "localhost".
fn split_registry_repository(name: &str, default_registry: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(HoistError::InvalidReference(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() {
        return Err(HoistError::InvalidReference(
            "Empty repository in reference".to_string(),
        ));
    }

    let repository = if default_registry == DEFAULT_REGISTRY && !name.contains('/') {
        format!("library/{}", name)
    } else {
        name.to_string()
    };

    Ok((default_registry.to_string(), repository))
}
