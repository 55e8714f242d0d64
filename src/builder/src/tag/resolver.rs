//! Tag resolution.
//!
//! A release build may publish the floating tags `latest`, `MAJOR` and
//! `MAJOR.MINOR` next to its exact tags, but never moves a floating tag away
//! from a newer release that already owns it. Each floating tag class covers a
//! version range; if the repository already holds a version above ours inside
//! that range, the tag is left alone.
//!
//! | tag           | excluded when an existing release V satisfies |
//! |---------------|-----------------------------------------------|
//! | `latest`      | app < V                                       |
//! | `MAJOR`       | app < V < (MAJOR+1).0.0                       |
//! | `MAJOR.MINOR` | app < V < MAJOR.(MINOR+1).0                   |
//!
//! `MAJOR.MINOR.PATCH` and the complete version are exact and always published.

use std::sync::Arc;

use hoist_core::config::{ExtraTag, PushExtraTags};
use hoist_core::context::BuildContext;
use hoist_core::error::{HoistError, Result};
use semver::Version;
use tracing::Instrument;

use super::version::{sanitize_tag, VersionModel};
use crate::registry::RegistryPort;

/// Tags chosen for one publish, in push order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTags {
    pub registry: String,
    pub repository: String,
    pub tags: Vec<String>,
}

impl ResolvedTags {
    /// Full `registry/repository:tag` references.
    pub fn references(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|tag| format!("{}/{}:{}", self.registry, self.repository, tag))
            .collect()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Resolves tags against a repository's live tag list.
pub struct TagResolver {
    registry: Arc<dyn RegistryPort>,
    ctx: BuildContext,
}

impl TagResolver {
    pub fn new(registry: Arc<dyn RegistryPort>, ctx: BuildContext) -> Self {
        Self { registry, ctx }
    }

    /// Fetch the repository's tags and resolve. A tag listing failure aborts.
    pub async fn resolve(&self, version: &VersionModel, repository: &str) -> Result<ResolvedTags> {
        async {
            let existing = self.registry.get_tags(repository).await?;
            tracing::debug!(existing = existing.len(), "Fetched repository tags");
            self.resolve_with(version, repository, &existing)
        }
        .instrument(self.ctx.span().clone())
        .await
    }

    /// Resolve against a known tag list.
    pub fn resolve_with(
        &self,
        version: &VersionModel,
        repository: &str,
        existing: &[String],
    ) -> Result<ResolvedTags> {
        let config = self.ctx.config();
        let tags = resolve_tags(
            version,
            existing,
            &config.push_extra_tags,
            config.tag_overwrite,
        )?;
        tracing::info!(tags = ?tags, "Resolved tags");
        Ok(ResolvedTags {
            registry: config.registry.clone(),
            repository: repository.to_string(),
            tags,
        })
    }
}

/// Compute the tags to publish for `version` given the repository's `existing` tags.
pub fn resolve_tags(
    version: &VersionModel,
    existing: &[String],
    extra: &PushExtraTags,
    overwrite: bool,
) -> Result<Vec<String>> {
    let Some(release) = release_version(version)? else {
        let mut tags = vec![version.complete_version().to_string()];
        if version.is_snapshot() {
            tags.push(sanitize_tag(version.given_version()));
        }
        return Ok(dedup(tags));
    };

    let existing: Vec<Version> = existing
        .iter()
        .filter_map(|tag| parse_existing_tag(tag))
        .collect();

    let mut tags = Vec::new();
    for class in [ExtraTag::Latest, ExtraTag::Major, ExtraTag::Minor, ExtraTag::Patch] {
        if !extra.is_enabled(class) {
            continue;
        }
        let tag = floating_tag(class, &release);
        if let Some(newer) = shadowed_by(class, &release, &existing) {
            if overwrite {
                tracing::warn!(
                    tag = %tag,
                    newer = %newer,
                    "Overwriting tag owned by a newer release"
                );
            } else {
                tracing::info!(tag = %tag, newer = %newer, "Tag excluded, newer release exists");
                continue;
            }
        }
        tags.push(tag);
    }
    tags.push(version.complete_version().to_string());

    Ok(dedup(tags))
}

/// The app version as a release, or `None` for a non-release build.
///
/// A release is a non-snapshot build whose version is three dot-separated
/// numeric components.
fn release_version(version: &VersionModel) -> Result<Option<Version>> {
    if version.is_snapshot() {
        return Ok(None);
    }
    let app = version.app_version();
    let parts: Vec<&str> = app.split('.').collect();
    let numeric = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !numeric {
        return Ok(None);
    }
    Version::parse(app).map(Some).map_err(|e| HoistError::InvalidVersion {
        version: app.to_string(),
        message: e.to_string(),
    })
}

/// Leniently read a repository tag as a release version.
///
/// Accepts an optional `v` prefix and one to three numeric components; missing
/// components are zero. Anything else (`latest`, pre-release or complete
/// version tags) is not a release and yields `None`.
fn parse_existing_tag(tag: &str) -> Option<Version> {
    let trimmed = tag.strip_prefix('v').unwrap_or(tag);
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

fn floating_tag(class: ExtraTag, release: &Version) -> String {
    match class {
        ExtraTag::Latest => "latest".to_string(),
        ExtraTag::Major => release.major.to_string(),
        ExtraTag::Minor => format!("{}.{}", release.major, release.minor),
        ExtraTag::Patch => format!("{}.{}.{}", release.major, release.minor, release.patch),
    }
}

/// The newest existing release that keeps `class` from being moved to `release`.
fn shadowed_by<'a>(class: ExtraTag, release: &Version, existing: &'a [Version]) -> Option<&'a Version> {
    let upper = match class {
        ExtraTag::Latest => None,
        ExtraTag::Major => Some(Version::new(release.major.saturating_add(1), 0, 0)),
        ExtraTag::Minor => Some(Version::new(release.major, release.minor.saturating_add(1), 0)),
        ExtraTag::Patch => return None,
    };
    existing
        .iter()
        .filter(|v| *v > release)
        .filter(|v| upper.as_ref().map_or(true, |upper| *v < upper))
        .max()
}

fn dedup(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}
