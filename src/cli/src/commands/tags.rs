//! `hoist tags` command: show the tags a version would be published under.

use std::sync::Arc;

use clap::Args;
use hoist_builder::{BaseImage, HttpRegistry, ImageReference, ResolvedTags, TagResolver, VersionModel};
use hoist_core::{BuildContext, BuilderConfig};

use super::{CredentialArgs, RegistryArgs};

#[derive(Args)]
pub struct TagsArgs {
    /// Target repository, e.g. "apps/demo"
    #[arg(long)]
    pub repository: String,

    /// Declared version; a -SNAPSHOT suffix marks a snapshot build
    #[arg(long)]
    pub version: String,

    /// Generated artifact version (defaults to --version)
    #[arg(long = "app-version")]
    pub app_version: Option<String>,

    /// Base image the build would use
    #[arg(long)]
    pub base: String,

    /// Resolve against these tags instead of the registry's list, can be repeated
    #[arg(long = "existing-tag")]
    pub existing_tag: Vec<String>,

    /// Do not contact the registry
    #[arg(long)]
    pub offline: bool,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

fn version_model(
    args: &TagsArgs,
    config: &BuilderConfig,
) -> Result<VersionModel, Box<dyn std::error::Error>> {
    let base = ImageReference::parse_in(&args.base, &config.registry)?;
    let app_version = args.app_version.as_deref().unwrap_or(&args.version);
    Ok(VersionModel::new(
        &args.version,
        app_version,
        &config.build_tool_version,
        &BaseImage::from_reference(&base),
    )?)
}

async fn resolve(args: &TagsArgs) -> Result<ResolvedTags, Box<dyn std::error::Error>> {
    let config = args.registry.load()?;
    let version = version_model(args, &config)?;

    let credentials = if args.offline {
        None
    } else {
        args.credentials.load(&config.registry)?
    };
    let registry = HttpRegistry::from_config(&config)?.with_credentials(credentials);
    let resolver = TagResolver::new(Arc::new(registry), BuildContext::new(config, &args.repository));

    let tags = if args.offline || !args.existing_tag.is_empty() {
        resolver.resolve_with(&version, &args.repository, &args.existing_tag)?
    } else {
        resolver.resolve(&version, &args.repository).await?
    };
    Ok(tags)
}

pub async fn execute(args: TagsArgs) -> Result<(), Box<dyn std::error::Error>> {
    for reference in resolve(&args).await?.references() {
        println!("{}", reference);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(version: &str, existing: &[&str]) -> TagsArgs {
        TagsArgs {
            repository: "apps/demo".to_string(),
            version: version.to_string(),
            app_version: None,
            base: "base/wingnut11:1.3.2".to_string(),
            existing_tag: existing.iter().map(|t| t.to_string()).collect(),
            offline: true,
            registry: RegistryArgs {
                registry: Some("registry.internal".to_string()),
                build_tool_version: Some("1.12.0".to_string()),
                ..Default::default()
            },
            credentials: CredentialArgs::default(),
        }
    }

    #[tokio::test]
    async fn test_offline_release_tags() {
        let tags = resolve(&args("1.2.3", &[])).await.unwrap();
        assert_eq!(
            tags.references(),
            vec![
                "registry.internal/apps/demo:latest",
                "registry.internal/apps/demo:1",
                "registry.internal/apps/demo:1.2",
                "registry.internal/apps/demo:1.2.3",
                "registry.internal/apps/demo:1.2.3-b1.12.0-wingnut11-1.3.2",
            ]
        );
    }

    #[tokio::test]
    async fn test_offline_respects_existing_tags() {
        let tags = resolve(&args("1.2.1", &["1.2.2", "latest"])).await.unwrap();
        assert!(!tags.contains("latest"));
        assert!(!tags.contains("1.2"));
        assert!(tags.contains("1.2.1"));
    }

    #[tokio::test]
    async fn test_offline_extra_tags_disabled() {
        let mut tags_args = args("1.2.3", &[]);
        tags_args.registry.push_extra_tags = Some(String::new());
        let tags = resolve(&tags_args).await.unwrap();
        assert_eq!(tags.tags, vec!["1.2.3-b1.12.0-wingnut11-1.3.2"]);
    }

    #[tokio::test]
    async fn test_invalid_non_snapshot_app_version() {
        let mut tags_args = args("1.2.3", &[]);
        tags_args.app_version = Some("1.2.4".to_string());
        assert!(resolve(&tags_args).await.is_err());
    }
}
