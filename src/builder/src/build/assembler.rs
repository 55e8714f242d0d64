//! Layer assembler: `Pull → Build → Push` against a [`RegistryPort`].
//!
//! Pull reuses the base image's layers by mounting them into the target
//! repository and stores the base manifest and config as working files in the
//! build context. Build packs each `layer/<name>` directory into a new blob,
//! appends it to the working manifest and config, and rewrites both. Push
//! uploads the new blobs and then the manifest once per tag.
//!
//! Every step can be repeated safely. Blobs already in the registry are
//! detected by digest and skipped; manifest pushes overwrite their tag.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use hoist_core::context::BuildContext;
use hoist_core::error::{HoistError, Result};
use tracing::Instrument;

use super::layer::{pack_directory_as_layer, PackedLayer};
use crate::oci::digest::digest_of_bytes;
use crate::oci::{ContainerConfig, Digest, ImageReference, Manifest, RegistryCredentials};
use crate::registry::RegistryPort;

const MANIFEST_FILE: &str = "manifest.json";
const CONFIG_FILE: &str = "config.json";
const BASE_MANIFEST_FILE: &str = "base-manifest.json";
const BASE_CONFIG_FILE: &str = "base-config.json";
const LAYER_DIR: &str = "layer";

/// Inputs for one image build, prepared by the caller.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Build context directory holding `layer/<name>/` trees and working files
    pub context_dir: PathBuf,
    /// Resolved base image
    pub base_image: ImageReference,
    /// Target repository (e.g., "apps/demo")
    pub repository: String,
    /// Environment variables merged into the image config
    pub env: BTreeMap<String, String>,
    /// Labels merged into the image config
    pub labels: BTreeMap<String, String>,
    /// Command override; `None` or empty keeps the base image's value
    pub cmd: Option<Vec<String>>,
    /// Entrypoint override; `None` or empty keeps the base image's value
    pub entrypoint: Option<Vec<String>>,
    /// Working directory override
    pub working_dir: Option<String>,
    /// Creation time stamped into the config; `None` keeps the base image's
    pub created: Option<DateTime<Utc>>,
}

impl BuildConfig {
    pub fn new(
        context_dir: impl Into<PathBuf>,
        base_image: ImageReference,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            context_dir: context_dir.into(),
            base_image,
            repository: repository.into(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            cmd: None,
            entrypoint: None,
            working_dir: None,
            created: None,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.context_dir.join(MANIFEST_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.context_dir.join(CONFIG_FILE)
    }

    pub fn layer_dir(&self) -> PathBuf {
        self.context_dir.join(LAYER_DIR)
    }
}

/// Result of the Pull step.
#[derive(Debug, Clone)]
pub struct PulledImage {
    pub manifest: Manifest,
    pub config: ContainerConfig,
    /// Base layers mounted into the target repository by this pull
    pub mounted: Vec<Digest>,
    /// Base layers the target repository already had
    pub present: Vec<Digest>,
}

/// Result of the Build step.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub repository: String,
    /// Newly packed layers, in manifest order
    pub layers: Vec<PackedLayer>,
    pub config_digest: Digest,
    pub config_size: u64,
    pub config_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// What a push did.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Blobs uploaded by this push
    pub pushed: Vec<Digest>,
    /// Blobs the registry already had
    pub skipped: Vec<Digest>,
    /// Tags the manifest was pushed under
    pub tags: Vec<String>,
    /// Digest of the pushed manifest bytes
    pub manifest_digest: Option<Digest>,
}

impl PushReport {
    /// Everything this push put into the registry, blobs first.
    pub fn published(&self) -> Vec<String> {
        self.pushed
            .iter()
            .map(ToString::to_string)
            .chain(self.tags.iter().cloned())
            .collect()
    }
}

/// Drives Pull, Build and Push for one build context.
pub struct LayerAssembler {
    registry: Arc<dyn RegistryPort>,
    ctx: BuildContext,
}

impl LayerAssembler {
    pub fn new(registry: Arc<dyn RegistryPort>, ctx: BuildContext) -> Self {
        Self { registry, ctx }
    }

    /// Fetch the base image, mount its layers into the target repository and
    /// store manifest and config as working files.
    pub async fn pull(
        &self,
        config: &BuildConfig,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<PulledImage> {
        self.pull_inner(config, credentials)
            .instrument(self.ctx.span().clone())
            .await
    }

    async fn pull_inner(
        &self,
        config: &BuildConfig,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<PulledImage> {
        let base = &config.base_image;
        tracing::info!(base_image = %base, "Pulling base image");

        let manifest = self
            .registry
            .get_manifest(&base.repository, base.manifest_reference())
            .await
            .map_err(|e| base_unavailable(base, "fetch manifest", e))?;

        let mut mounted = Vec::new();
        let mut present = Vec::new();
        for layer in &manifest.layers {
            if self
                .registry
                .layer_exists(&config.repository, &layer.digest)
                .await?
            {
                present.push(layer.digest.clone());
                continue;
            }
            self.registry
                .mount_layer(&base.repository, &config.repository, &layer.digest, credentials)
                .await?;
            tracing::debug!(digest = %layer.digest, from = %base.repository, "Mounted base layer");
            mounted.push(layer.digest.clone());
        }

        let container_config = self
            .registry
            .get_container_config(&base.repository, &manifest.config.digest)
            .await
            .map_err(|e| base_unavailable(base, "fetch config", e))?;
        container_config.validate_alignment(manifest.layers.len())?;

        std::fs::create_dir_all(&config.context_dir).map_err(|e| {
            HoistError::Build(format!(
                "Failed to create build context {}: {}",
                config.context_dir.display(),
                e
            ))
        })?;
        let manifest_bytes = manifest.to_vec()?;
        let config_bytes = container_config.to_vec()?;
        write_file(&config.context_dir.join(BASE_MANIFEST_FILE), &manifest_bytes)?;
        write_file(&config.context_dir.join(BASE_CONFIG_FILE), &config_bytes)?;
        write_file(&config.manifest_path(), &manifest_bytes)?;
        write_file(&config.config_path(), &config_bytes)?;

        tracing::info!(
            base_image = %base,
            layers = manifest.layers.len(),
            mounted = mounted.len(),
            "Base image pulled"
        );

        Ok(PulledImage {
            manifest,
            config: container_config,
            mounted,
            present,
        })
    }

    /// Pack new layers and rewrite the working manifest and config.
    pub async fn build(&self, config: &BuildConfig) -> Result<BuildOutput> {
        self.ctx.span().in_scope(|| self.build_blocking(config))
    }

    fn build_blocking(&self, config: &BuildConfig) -> Result<BuildOutput> {
        let layer_dir = config.layer_dir();
        let names = layer_names(&layer_dir)?;
        tracing::info!(layers = names.len(), "Building image layers");

        let layers = names
            .iter()
            .map(|name| pack_directory_as_layer(&layer_dir, name, &config.context_dir))
            .collect::<Result<Vec<_>>>()?;

        let mut manifest = Manifest::from_slice(&read_working_file(
            &config.context_dir,
            BASE_MANIFEST_FILE,
            MANIFEST_FILE,
        )?)?
        .clean_copy();
        let mut container = ContainerConfig::from_slice(&read_working_file(
            &config.context_dir,
            BASE_CONFIG_FILE,
            CONFIG_FILE,
        )?)?
        .clean_copy();

        for layer in &layers {
            manifest.push_layer(layer.size, layer.digest.clone());
            container.push_diff_id(layer.diff_id.clone());
        }

        container.merge_env(&config.env);
        container.merge_labels(&config.labels);
        if let Some(cmd) = config.cmd.as_ref().filter(|c| !c.is_empty()) {
            container.config.cmd = Some(cmd.clone());
        }
        if let Some(entrypoint) = config.entrypoint.as_ref().filter(|e| !e.is_empty()) {
            container.config.entrypoint = Some(entrypoint.clone());
        }
        if let Some(working_dir) = config.working_dir.as_ref().filter(|w| !w.is_empty()) {
            container.config.working_dir = Some(working_dir.clone());
        }
        if let Some(created) = config.created {
            container.created = Some(created.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        container.validate_alignment(manifest.layers.len())?;

        let config_bytes = container.to_vec()?;
        let config_digest = digest_of_bytes(&config_bytes);
        let config_size = config_bytes.len() as u64;
        manifest.set_config(config_size, config_digest.clone());

        write_file(&config.config_path(), &config_bytes)?;
        write_file(&config.manifest_path(), &manifest.to_vec()?)?;

        tracing::info!(
            config_digest = %config_digest,
            layers = manifest.layers.len(),
            new_layers = layers.len(),
            "Image assembled"
        );

        Ok(BuildOutput {
            repository: config.repository.clone(),
            layers,
            config_digest,
            config_size,
            config_path: config.config_path(),
            manifest_path: config.manifest_path(),
        })
    }

    /// Push new layers and the config blob, then the manifest under each tag.
    pub async fn push(
        &self,
        output: &BuildOutput,
        tags: &[String],
        credentials: Option<&RegistryCredentials>,
    ) -> Result<PushReport> {
        let report = self.push_blobs(output, credentials).await?;
        self.push_tags(output, tags, credentials, report).await
    }

    /// Upload new layer blobs in ascending digest order, then the config blob.
    pub async fn push_blobs(
        &self,
        output: &BuildOutput,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<PushReport> {
        async {
            let mut report = PushReport::default();

            let mut layers: Vec<&PackedLayer> = output.layers.iter().collect();
            layers.sort_by(|a, b| a.digest.cmp(&b.digest));

            for layer in layers {
                self.push_blob(&layer.path, &layer.digest, output, credentials, &mut report)
                    .await
                    .map_err(|e| partial_publish(&output.repository, &report, e))?;
            }
            self.push_blob(
                &output.config_path,
                &output.config_digest,
                output,
                credentials,
                &mut report,
            )
            .await
            .map_err(|e| partial_publish(&output.repository, &report, e))?;

            tracing::info!(
                pushed = report.pushed.len(),
                skipped = report.skipped.len(),
                "Blobs pushed"
            );
            Ok(report)
        }
        .instrument(self.ctx.span().clone())
        .await
    }

    /// Push the working manifest once per tag.
    pub async fn push_tags(
        &self,
        output: &BuildOutput,
        tags: &[String],
        credentials: Option<&RegistryCredentials>,
        mut report: PushReport,
    ) -> Result<PushReport> {
        async {
            let manifest_bytes = read_file(&output.manifest_path)?;
            let manifest = Manifest::from_slice(&manifest_bytes)?;
            if manifest.config.digest != output.config_digest {
                return Err(HoistError::DigestMismatch {
                    subject: output.manifest_path.display().to_string(),
                    expected: output.config_digest.to_string(),
                    actual: manifest.config.digest.to_string(),
                });
            }
            let manifest_digest = digest_of_bytes(&manifest_bytes);

            for tag in tags {
                self.registry
                    .push_manifest(
                        &manifest_bytes,
                        manifest.content_type(),
                        &output.repository,
                        tag,
                        credentials,
                    )
                    .await
                    .map_err(|e| partial_publish(&output.repository, &report, e))?;
                tracing::info!(tag = %tag, digest = %manifest_digest, "Manifest pushed");
                report.tags.push(tag.clone());
            }

            report.manifest_digest = Some(manifest_digest);
            Ok(report)
        }
        .instrument(self.ctx.span().clone())
        .await
    }

    async fn push_blob(
        &self,
        path: &Path,
        digest: &Digest,
        output: &BuildOutput,
        credentials: Option<&RegistryCredentials>,
        report: &mut PushReport,
    ) -> Result<()> {
        if self
            .registry
            .layer_exists(&output.repository, digest)
            .await?
        {
            tracing::debug!(digest = %digest, "Blob already present");
            report.skipped.push(digest.clone());
            return Ok(());
        }

        let data = read_file(path)?;
        let actual = digest_of_bytes(&data);
        if &actual != digest {
            return Err(HoistError::DigestMismatch {
                subject: path.display().to_string(),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        let size = data.len();
        self.registry
            .push_layer(data, &output.repository, digest, credentials)
            .await?;
        tracing::debug!(digest = %digest, size, "Blob pushed");
        report.pushed.push(digest.clone());
        Ok(())
    }
}

/// Immediate subdirectories of `layer_dir`, sorted. A missing directory has none.
fn layer_names(layer_dir: &Path) -> Result<Vec<String>> {
    if !layer_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    let entries = std::fs::read_dir(layer_dir).map_err(|e| {
        HoistError::Build(format!(
            "Failed to read layer directory {}: {}",
            layer_dir.display(),
            e
        ))
    })?;
    for entry in entries {
        let entry = entry
            .map_err(|e| HoistError::Build(format!("Failed to read layer entry: {}", e)))?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Read the pristine base copy when present, else the working file.
fn read_working_file(context_dir: &Path, base: &str, working: &str) -> Result<Vec<u8>> {
    let base_path = context_dir.join(base);
    if base_path.exists() {
        return read_file(&base_path);
    }
    read_file(&context_dir.join(working))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| HoistError::Build(format!("Failed to read {}: {}", path.display(), e)))
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data)
        .map_err(|e| HoistError::Build(format!("Failed to write {}: {}", path.display(), e)))
}

fn base_unavailable(base: &ImageReference, step: &str, err: HoistError) -> HoistError {
    HoistError::BaseImageUnavailable {
        image: base.to_string(),
        message: format!("Failed to {}: {}", step, err),
    }
}

/// Wrap a push failure as partial once anything has been uploaded.
fn partial_publish(repository: &str, report: &PushReport, err: HoistError) -> HoistError {
    if report.pushed.is_empty() && report.tags.is_empty() {
        return err;
    }
    HoistError::PartialPublish {
        repository: repository.to_string(),
        pushed: report.published(),
        message: err.to_string(),
    }
}
