//! Version identity of a build.

use std::fmt;

use hoist_core::error::{HoistError, Result};

use crate::oci::ImageReference;

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";
const MAX_TAG_LEN: usize = 128;

/// Short name and version of the base image, as embedded in the complete version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    pub name: String,
    pub version: String,
}

impl BaseImage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Base image view of a reference. Digest-pinned references use the first
    /// twelve hex characters of the digest as their version.
    pub fn from_reference(reference: &ImageReference) -> Self {
        let version = match (&reference.tag, &reference.digest) {
            (_, Some(digest)) => {
                let hex = digest.split_once(':').map(|(_, h)| h).unwrap_or(digest);
                hex.chars().take(12).collect()
            }
            (Some(tag), None) => tag.clone(),
            (None, None) => "latest".to_string(),
        };
        Self::new(reference.short_name(), version)
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// The four-part version identity of one build. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionModel {
    app_version: String,
    snapshot: bool,
    given_version: String,
    complete_version: String,
}

impl VersionModel {
    /// Build the version identity from build inputs.
    ///
    /// `given_version` is what the caller declared; a `-SNAPSHOT` suffix marks a
    /// snapshot build, whose `app_version` is the generated artifact version. For
    /// any other build the two must be equal.
    pub fn new(
        given_version: &str,
        app_version: &str,
        build_tool_version: &str,
        base_image: &BaseImage,
    ) -> Result<Self> {
        let given_version = given_version.trim();
        let app_version = app_version.trim();
        if given_version.is_empty() {
            return Err(HoistError::InvalidVersion {
                version: given_version.to_string(),
                message: "given version is empty".to_string(),
            });
        }
        if app_version.is_empty() {
            return Err(HoistError::InvalidVersion {
                version: app_version.to_string(),
                message: "application version is empty".to_string(),
            });
        }

        let snapshot = given_version.ends_with(SNAPSHOT_SUFFIX);
        if !snapshot && app_version != given_version {
            return Err(HoistError::InvalidVersion {
                version: app_version.to_string(),
                message: format!(
                    "differs from given version '{}' in a non-snapshot build",
                    given_version
                ),
            });
        }

        let complete_version = sanitize_tag(&format!(
            "{}-b{}-{}",
            app_version, build_tool_version, base_image
        ));

        Ok(Self {
            app_version: app_version.to_string(),
            snapshot,
            given_version: given_version.to_string(),
            complete_version,
        })
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn given_version(&self) -> &str {
        &self.given_version
    }

    /// `<app>-b<buildTool>-<baseName>-<baseVersion>`, valid as a tag.
    pub fn complete_version(&self) -> &str {
        &self.complete_version
    }
}

/// Coerce a string into the registry tag grammar `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
pub fn sanitize_tag(raw: &str) -> String {
    let mut tag: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TAG_LEN)
        .collect();
    if tag.starts_with('.') || tag.starts_with('-') {
        tag.replace_range(..1, "_");
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wingnut() -> BaseImage {
        BaseImage::new("wingnut11", "1.3.2")
    }

    #[test]
    fn test_release_version() {
        let version = VersionModel::new("2.4.5", "2.4.5", "1.12.0", &wingnut()).unwrap();
        assert_eq!(version.app_version(), "2.4.5");
        assert!(!version.is_snapshot());
        assert_eq!(version.given_version(), "2.4.5");
        assert_eq!(version.complete_version(), "2.4.5-b1.12.0-wingnut11-1.3.2");
    }

    #[test]
    fn test_snapshot_version() {
        let version = VersionModel::new(
            "branch_test-SNAPSHOT",
            "branch_test-20170101.1",
            "1.12.0",
            &wingnut(),
        )
        .unwrap();
        assert!(version.is_snapshot());
        assert_eq!(version.given_version(), "branch_test-SNAPSHOT");
        assert_eq!(
            version.complete_version(),
            "branch_test-20170101.1-b1.12.0-wingnut11-1.3.2"
        );
    }

    #[test]
    fn test_non_snapshot_mismatch_rejected() {
        let err = VersionModel::new("2.4.5", "2.4.6", "1.12.0", &wingnut()).unwrap_err();
        assert!(matches!(err, HoistError::InvalidVersion { .. }));
    }

    #[test]
    fn test_empty_versions_rejected() {
        assert!(VersionModel::new("", "1.0.0", "1", &wingnut()).is_err());
        assert!(VersionModel::new("1-SNAPSHOT", " ", "1", &wingnut()).is_err());
    }

    #[test]
    fn test_complete_version_sanitized() {
        let version = VersionModel::new(
            "feature/login-SNAPSHOT",
            "feature/login-20240101.3",
            "1.12.0+dev",
            &wingnut(),
        )
        .unwrap();
        assert_eq!(
            version.complete_version(),
            "feature_login-20240101.3-b1.12.0_dev-wingnut11-1.3.2"
        );
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("1.2.3"), "1.2.3");
        assert_eq!(sanitize_tag("a b:c@d"), "a_b_c_d");
        assert_eq!(sanitize_tag(".hidden"), "_hidden");
        assert_eq!(sanitize_tag(&"x".repeat(200)).len(), 128);
    }

    #[test]
    fn test_base_image_from_reference() {
        let reference =
            ImageReference::parse_in("base/wingnut11:1.3.2", "registry.internal").unwrap();
        assert_eq!(BaseImage::from_reference(&reference), wingnut());

        let pinned = ImageReference::parse_in(
            "base/wingnut11@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            "registry.internal",
        )
        .unwrap();
        assert_eq!(BaseImage::from_reference(&pinned).version, "0123456789ab");
    }
}
