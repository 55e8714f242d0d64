//! Publish pipeline: Pull → Build → Push blobs → resolve tags → push manifest per tag.
//!
//! Steps run strictly in order and the first failure aborts the rest. The
//! whole pipeline can be rerun after a failure; content already in the
//! registry is detected and not uploaded again.

use std::sync::Arc;

use hoist_core::context::BuildContext;
use hoist_core::error::Result;
use tracing::Instrument;

use crate::build::{BuildConfig, BuildOutput, LayerAssembler, PushReport};
use crate::oci::{Digest, RegistryCredentials};
use crate::registry::RegistryPort;
use crate::tag::{ResolvedTags, TagResolver, VersionModel};

/// Outcome of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// Base layers mounted into the target repository
    pub mounted: Vec<Digest>,
    pub build: BuildOutput,
    pub push: PushReport,
    pub tags: ResolvedTags,
}

impl PublishReport {
    /// Published `registry/repository:tag` references.
    pub fn references(&self) -> Vec<String> {
        self.tags.references()
    }
}

/// Build the image described by `build_config` and publish it under the tags
/// resolved for `version`.
pub async fn publish(
    ctx: &BuildContext,
    registry: Arc<dyn RegistryPort>,
    build_config: &BuildConfig,
    version: &VersionModel,
    credentials: Option<&RegistryCredentials>,
) -> Result<PublishReport> {
    let assembler = LayerAssembler::new(registry.clone(), ctx.clone());
    let resolver = TagResolver::new(registry, ctx.clone());

    async {
        tracing::info!(
            version = version.app_version(),
            complete_version = version.complete_version(),
            base_image = %build_config.base_image,
            "Publishing image"
        );

        let pulled = assembler.pull(build_config, credentials).await?;
        let output = assembler.build(build_config).await?;
        let report = assembler.push_blobs(&output, credentials).await?;
        let tags = resolver.resolve(version, &build_config.repository).await?;
        let report = assembler
            .push_tags(&output, &tags.tags, credentials, report)
            .await?;

        tracing::info!(
            tags = tags.tags.len(),
            pushed = report.pushed.len(),
            skipped = report.skipped.len(),
            "Image published"
        );

        Ok(PublishReport {
            mounted: pulled.mounted,
            build: output,
            push: report,
            tags,
        })
    }
    .instrument(ctx.span().clone())
    .await
}
