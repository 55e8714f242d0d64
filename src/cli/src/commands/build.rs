//! `hoist build` command: assemble an image on a base image and publish it.
//!
//! The build context holds one directory per application layer under
//! `layer/<name>/`. Base layers are mounted, never downloaded.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use hoist_builder::{publish, BaseImage, BuildConfig, HttpRegistry, ImageReference, VersionModel};
use hoist_core::BuildContext;

use super::{parse_key_values, CredentialArgs, RegistryArgs};

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory (contains layer/<name>/ trees)
    #[arg(long, default_value = ".")]
    pub context: String,

    /// Base image, e.g. "base/wingnut11:1.3.2"; must live in the output registry
    #[arg(long = "from")]
    pub from: String,

    /// Target repository, e.g. "apps/demo"
    #[arg(long)]
    pub repository: String,

    /// Declared version; a -SNAPSHOT suffix marks a snapshot build
    #[arg(long)]
    pub version: String,

    /// Generated artifact version (defaults to --version)
    #[arg(long = "app-version")]
    pub app_version: Option<String>,

    /// Environment variable for the image (KEY=VALUE), can be repeated
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Image label (KEY=VALUE), can be repeated
    #[arg(long = "label")]
    pub label: Vec<String>,

    /// Command override, one argument per flag
    #[arg(long = "cmd", allow_hyphen_values = true)]
    pub cmd: Vec<String>,

    /// Entrypoint override, one argument per flag
    #[arg(long = "entrypoint", allow_hyphen_values = true)]
    pub entrypoint: Vec<String>,

    /// Working directory override
    #[arg(long = "workdir")]
    pub workdir: Option<String>,

    /// Image creation time (RFC 3339); defaults to the base image's
    #[arg(long, value_parser = parse_created)]
    pub created: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

impl BuildArgs {
    fn build_config(
        &self,
        context_dir: PathBuf,
        base_image: ImageReference,
    ) -> Result<BuildConfig, Box<dyn std::error::Error>> {
        let mut config = BuildConfig::new(context_dir, base_image, &self.repository);
        config.env = parse_key_values("env", &self.env)?;
        config.labels = parse_key_values("label", &self.label)?;
        if !self.cmd.is_empty() {
            config.cmd = Some(self.cmd.clone());
        }
        if !self.entrypoint.is_empty() {
            config.entrypoint = Some(self.entrypoint.clone());
        }
        config.working_dir = self.workdir.clone();
        config.created = self.created;
        Ok(config)
    }
}

fn parse_created(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| format!("Invalid creation time '{}': {}", value, e))
}

pub async fn execute(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let context_dir = PathBuf::from(&args.context)
        .canonicalize()
        .map_err(|e| format!("Invalid build context path '{}': {}", args.context, e))?;

    if !context_dir.is_dir() {
        return Err(format!(
            "Build context '{}' is not a directory",
            context_dir.display()
        )
        .into());
    }

    let config = args.registry.load()?;
    let base_image = ImageReference::parse_in(&args.from, &config.registry)?;
    if base_image.registry != config.registry {
        tracing::warn!(
            base_registry = %base_image.registry,
            registry = %config.registry,
            "Base image is outside the output registry; layer mounts will fail"
        );
    }

    let app_version = args.app_version.as_deref().unwrap_or(&args.version);
    let version = VersionModel::new(
        &args.version,
        app_version,
        &config.build_tool_version,
        &BaseImage::from_reference(&base_image),
    )?;

    let credentials = args.credentials.load(&config.registry)?;
    let registry = HttpRegistry::from_config(&config)?.with_credentials(credentials.clone());
    let build_config = args.build_config(context_dir, base_image)?;
    let ctx = BuildContext::new(config, &args.repository);

    let report = publish(
        &ctx,
        Arc::new(registry),
        &build_config,
        &version,
        credentials.as_ref(),
    )
    .await?;

    for reference in report.references() {
        println!("{}", reference);
    }

    Ok(())
}
