//! CLI command definitions and dispatch.

mod build;
mod tags;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hoist_builder::RegistryCredentials;
use hoist_core::{BuilderConfig, PushExtraTags};

/// Hoist - daemonless container image builder.
#[derive(Parser)]
#[command(name = "hoist", version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an image on top of a base image and publish it
    Build(build::BuildArgs),
    /// Show which tags a version would be published under
    Tags(tags::TagsArgs),
}

/// Registry and tagging options shared by all commands.
#[derive(Args, Debug, Default)]
pub struct RegistryArgs {
    /// Builder configuration file (YAML)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Output registry host, overrides the config file
    #[arg(long)]
    pub registry: Option<String>,

    /// Use plain HTTP for the registry
    #[arg(long)]
    pub insecure: bool,

    /// Floating tags a release may get, e.g. "latest,major,minor,patch"
    #[arg(long = "push-extra-tags")]
    pub push_extra_tags: Option<String>,

    /// Move floating tags even when a newer release owns them
    #[arg(long = "tag-overwrite")]
    pub tag_overwrite: bool,

    /// Builder version recorded in complete version tags
    #[arg(long = "build-tool-version")]
    pub build_tool_version: Option<String>,
}

impl RegistryArgs {
    /// Configuration file values with command-line overrides applied.
    pub fn load(&self) -> Result<BuilderConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => BuilderConfig::from_file(path)?,
            None => BuilderConfig::default(),
        };
        if let Some(registry) = &self.registry {
            config.registry = registry.clone();
        }
        if self.insecure {
            config.insecure = true;
        }
        if let Some(tags) = &self.push_extra_tags {
            config.push_extra_tags = tags.parse::<PushExtraTags>()?;
        }
        if self.tag_overwrite {
            config.tag_overwrite = true;
        }
        if let Some(version) = &self.build_tool_version {
            config.build_tool_version = version.clone();
        }
        Ok(config)
    }
}

/// Where push credentials come from.
#[derive(Args, Debug, Default)]
pub struct CredentialArgs {
    /// Docker-style config.json to read credentials from
    #[arg(long = "docker-config")]
    pub docker_config: Option<PathBuf>,

    /// Cluster-provided registry secret (.dockerconfigjson)
    #[arg(long = "secret-file")]
    pub secret_file: Option<PathBuf>,
}

impl CredentialArgs {
    /// Secret file, then explicit docker config, then the default docker
    /// config and environment.
    pub fn load(
        &self,
        server: &str,
    ) -> Result<Option<RegistryCredentials>, Box<dyn std::error::Error>> {
        let credentials = match (&self.secret_file, &self.docker_config) {
            (Some(path), _) => RegistryCredentials::from_secret_file(path, server)?,
            (None, Some(path)) => RegistryCredentials::from_docker_config(path, server)?,
            (None, None) => RegistryCredentials::discover(server)?,
        };
        if credentials.is_none() {
            tracing::debug!(server, "No registry credentials found");
        }
        Ok(credentials)
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => build::execute(args).await,
        Command::Tags(args) => tags::execute(args).await,
    }
}

/// Parse KEY=VALUE pairs into a map. Later pairs win.
pub(crate) fn parse_key_values(
    kind: &str,
    pairs: &[String],
) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid {kind} (expected KEY=VALUE): {pair}"))?;
        if key.is_empty() {
            return Err(format!("Invalid {kind} (empty key): {pair}"));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_key_values_valid() {
        let pairs = vec!["VERSION=1.0".to_string(), "DEBUG=true".to_string()];
        let result = parse_key_values("env", &pairs).unwrap();
        assert_eq!(result.get("VERSION"), Some(&"1.0".to_string()));
        assert_eq!(result.get("DEBUG"), Some(&"true".to_string()));
    }

    #[test]
    fn test_parse_key_values_value_with_equals() {
        let pairs = vec!["URL=http://example.com?a=1".to_string()];
        let result = parse_key_values("env", &pairs).unwrap();
        assert_eq!(result.get("URL"), Some(&"http://example.com?a=1".to_string()));
    }

    #[test]
    fn test_parse_key_values_later_wins() {
        let pairs = vec!["A=1".to_string(), "A=2".to_string()];
        assert_eq!(parse_key_values("label", &pairs).unwrap()["A"], "2");
    }

    #[test]
    fn test_parse_key_values_invalid() {
        assert!(parse_key_values("env", &["NOEQUALS".to_string()]).is_err());
        assert!(parse_key_values("env", &["=value".to_string()]).is_err());
    }

    #[test]
    fn test_registry_args_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "registry: registry.internal:5000").unwrap();
        writeln!(file, "tag_overwrite: false").unwrap();

        let args = RegistryArgs {
            config: Some(file.path().to_path_buf()),
            registry: None,
            insecure: true,
            push_extra_tags: Some("latest,patch".to_string()),
            tag_overwrite: true,
            build_tool_version: Some("1.12.0".to_string()),
        };
        let config = args.load().unwrap();
        assert_eq!(config.registry, "registry.internal:5000");
        assert!(config.insecure);
        assert!(config.tag_overwrite);
        assert!(config.push_extra_tags.latest);
        assert!(!config.push_extra_tags.major);
        assert_eq!(config.build_tool_version, "1.12.0");
    }

    #[test]
    fn test_registry_args_invalid_extra_tags() {
        let args = RegistryArgs {
            push_extra_tags: Some("latest,bogus".to_string()),
            ..Default::default()
        };
        assert!(args.load().is_err());
    }

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from([
            "hoist",
            "build",
            "--from",
            "base/wingnut11:1.3.2",
            "--repository",
            "apps/demo",
            "--version",
            "2.4.5",
            "--env",
            "A=1",
            "--cmd",
            "/u01/bin/run",
            "--cmd",
            "start",
        ])
        .unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.repository, "apps/demo");
                assert_eq!(args.cmd, vec!["/u01/bin/run", "start"]);
                assert_eq!(args.env, vec!["A=1"]);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_cli_parses_tags_offline() {
        let cli = Cli::try_parse_from([
            "hoist",
            "-v",
            "tags",
            "--repository",
            "apps/demo",
            "--version",
            "1.2.1",
            "--base",
            "base/wingnut11:1.3.2",
            "--offline",
            "--existing-tag",
            "1.2.2",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Tags(args) => {
                assert!(args.offline);
                assert_eq!(args.existing_tag, vec!["1.2.2"]);
            }
            _ => panic!("expected tags"),
        }
    }
}
