use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HoistError, Result};

/// Builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Output registry host (e.g., "registry.internal:5000")
    pub registry: String,

    /// Talk plain HTTP to the registry instead of HTTPS
    pub insecure: bool,

    /// Which floating tags a release build may publish
    pub push_extra_tags: PushExtraTags,

    /// Republish floating tags even when a newer release already owns them
    pub tag_overwrite: bool,

    /// Version of this builder, embedded in the complete version tag
    pub build_tool_version: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            registry: "localhost:5000".to_string(),
            insecure: false,
            push_extra_tags: PushExtraTags::default(),
            tag_overwrite: false,
            build_tool_version: crate::VERSION.to_string(),
        }
    }
}

impl BuilderConfig {
    /// Load configuration from a YAML file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HoistError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| HoistError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Base URL of the registry API.
    pub fn registry_url(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}", scheme, self.registry.trim_end_matches('/'))
    }
}

/// A single floating tag class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraTag {
    Latest,
    Major,
    Minor,
    Patch,
}

impl std::fmt::Display for ExtraTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

impl std::str::FromStr for ExtraTag {
    type Err = HoistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "patch" => Ok(Self::Patch),
            other => Err(HoistError::Config(format!(
                "unknown extra tag: '{}' (supported: latest, major, minor, patch)",
                other
            ))),
        }
    }
}

/// Floating tag flags for release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushExtraTags {
    pub latest: bool,
    pub major: bool,
    pub minor: bool,
    pub patch: bool,
}

impl Default for PushExtraTags {
    fn default() -> Self {
        Self::all()
    }
}

impl PushExtraTags {
    /// Every floating tag enabled.
    pub fn all() -> Self {
        Self {
            latest: true,
            major: true,
            minor: true,
            patch: true,
        }
    }

    /// No floating tags.
    pub fn none() -> Self {
        Self {
            latest: false,
            major: false,
            minor: false,
            patch: false,
        }
    }

    pub fn is_enabled(&self, tag: ExtraTag) -> bool {
        match tag {
            ExtraTag::Latest => self.latest,
            ExtraTag::Major => self.major,
            ExtraTag::Minor => self.minor,
            ExtraTag::Patch => self.patch,
        }
    }

    pub fn enable(&mut self, tag: ExtraTag) {
        match tag {
            ExtraTag::Latest => self.latest = true,
            ExtraTag::Major => self.major = true,
            ExtraTag::Minor => self.minor = true,
            ExtraTag::Patch => self.patch = true,
        }
    }
}

impl std::str::FromStr for PushExtraTags {
    type Err = HoistError;

    /// Parse a comma separated list such as `"latest,major,minor,patch"`.
    fn from_str(s: &str) -> Result<Self> {
        let mut tags = Self::none();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            tags.enable(part.parse()?);
        }
        Ok(tags)
    }
}
