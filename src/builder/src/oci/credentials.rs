//! Registry credentials.
//!
//! Credentials are a static username/password pair for one registry server.
//! They come from a Docker-style `config.json` (`~/.docker/config.json`), from
//! a secret file the cluster mounts into the build pod (same JSON shape), or
//! from environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use hoist_core::error::{HoistError, Result};
use serde::Deserialize;

const USERNAME_ENV: &str = "HOIST_REGISTRY_USERNAME";
const PASSWORD_ENV: &str = "HOIST_REGISTRY_PASSWORD";

/// Username/password/server triple passed opaquely to registry push calls.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RegistryCredentials {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: normalize_server(&server.into()),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `HOIST_REGISTRY_USERNAME` / `HOIST_REGISTRY_PASSWORD`.
    ///
    /// Returns `None` unless both are set.
    pub fn from_env(server: &str) -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        Some(Self::new(server, username, password))
    }

    /// Credentials for `server` from a Docker-style config file.
    pub fn from_docker_config(path: &Path, server: &str) -> Result<Option<Self>> {
        DockerConfigFile::load(path)?.credentials_for(server)
    }

    /// Credentials from a cluster-provided secret file.
    ///
    /// The secret has the Docker config shape; when it holds a single server
    /// entry that entry is used regardless of the requested server name.
    pub fn from_secret_file(path: &Path, server: &str) -> Result<Option<Self>> {
        let file = DockerConfigFile::load(path)?;
        if let Some(creds) = file.credentials_for(server)? {
            return Ok(Some(creds));
        }
        if file.auths.len() == 1 {
            if let Some((only_server, _)) = file.auths.iter().next() {
                let mut creds = file.credentials_for(only_server)?;
                if let Some(ref mut c) = creds {
                    c.server = normalize_server(server);
                }
                return Ok(creds);
            }
        }
        Ok(None)
    }

    /// Resolve credentials: docker config at the default path, then env vars.
    pub fn discover(server: &str) -> Result<Option<Self>> {
        if let Some(path) = default_docker_config_path() {
            if path.exists() {
                if let Some(creds) = Self::from_docker_config(&path, server)? {
                    return Ok(Some(creds));
                }
            }
        }
        Ok(Self::from_env(server))
    }

    /// Value for an HTTP `Authorization: Basic` header.
    pub fn basic_auth_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

/// `~/.docker/config.json`, honoring `DOCKER_CONFIG`.
pub fn default_docker_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    dirs::home_dir().map(|h| h.join(".docker").join("config.json"))
}

/// Docker config file format.
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Per-registry auth entry.
#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl DockerConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            HoistError::Credentials(format!(
                "Failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            HoistError::Credentials(format!(
                "Failed to parse credentials file {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn credentials_for(&self, server: &str) -> Result<Option<RegistryCredentials>> {
        let wanted = normalize_server(server);
        let entry = self
            .auths
            .iter()
            .find(|(key, _)| normalize_server(key) == wanted)
            .map(|(_, entry)| entry);

        let Some(entry) = entry else {
            return Ok(None);
        };

        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            return Ok(Some(RegistryCredentials::new(&wanted, username, password)));
        }

        let Some(auth) = &entry.auth else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth.trim())
            .map_err(|e| {
                HoistError::Credentials(format!("Invalid auth entry for {}: {}", wanted, e))
            })?;
        let decoded = String::from_utf8(decoded).map_err(|e| {
            HoistError::Credentials(format!("Invalid auth entry for {}: {}", wanted, e))
        })?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            HoistError::Credentials(format!(
                "Invalid auth entry for {}: expected user:password",
                wanted
            ))
        })?;

        Ok(Some(RegistryCredentials::new(&wanted, username, password)))
    }
}

/// Normalize registry server names: strip scheme, path and trailing slash,
/// and unify the Docker Hub aliases.
fn normalize_server(server: &str) -> String {
    let s = server.trim().to_lowercase();
    let s = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(&s);
    let host = s.split('/').next().unwrap_or(s);
    match host {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "index.docker.io".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, json: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, json).unwrap();
        path
    }

    fn encoded(user: &str, pass: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass))
    }

    #[test]
    fn test_docker_config_auth_entry() {
        let dir = TempDir::new().unwrap();
        let json = format!(
            r#"{{"auths": {{"https://registry.internal:5000/v1/": {{"auth": "{}"}}}}}}"#,
            encoded("builder", "s3cret")
        );
        let path = write_config(&dir, "config.json", &json);

        let creds = RegistryCredentials::from_docker_config(&path, "registry.internal:5000")
            .unwrap()
            .unwrap();
        assert_eq!(creds.server, "registry.internal:5000");
        assert_eq!(creds.username, "builder");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_docker_config_explicit_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "config.json",
            r#"{"auths": {"ghcr.io": {"username": "u", "password": "p"}}}"#,
        );
        let creds = RegistryCredentials::from_docker_config(&path, "ghcr.io")
            .unwrap()
            .unwrap();
        assert_eq!(creds.username, "u");
        assert_eq!(creds.password, "p");
    }

    #[test]
    fn test_docker_config_missing_server() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "config.json", r#"{"auths": {}}"#);
        let creds = RegistryCredentials::from_docker_config(&path, "ghcr.io").unwrap();
        assert!(creds.is_none());
    }

    #[test]
    fn test_docker_config_invalid_auth() {
        let dir = TempDir::new().unwrap();
        let json = format!(
            r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#,
            base64::engine::general_purpose::STANDARD.encode("nocolon")
        );
        let path = write_config(&dir, "config.json", &json);
        let result = RegistryCredentials::from_docker_config(&path, "ghcr.io");
        assert!(matches!(result, Err(HoistError::Credentials(_))));
    }

    #[test]
    fn test_docker_config_unreadable() {
        let result =
            RegistryCredentials::from_docker_config(Path::new("/nonexistent/config.json"), "x");
        assert!(matches!(result, Err(HoistError::Credentials(_))));
    }

    #[test]
    fn test_docker_hub_normalization() {
        let dir = TempDir::new().unwrap();
        let json = format!(
            r#"{{"auths": {{"https://index.docker.io/v1/": {{"auth": "{}"}}}}}}"#,
            encoded("user", "pass")
        );
        let path = write_config(&dir, "config.json", &json);
        let creds = RegistryCredentials::from_docker_config(&path, "docker.io")
            .unwrap()
            .unwrap();
        assert_eq!(creds.server, "index.docker.io");
    }

    #[test]
    fn test_secret_file_single_entry_fallback() {
        let dir = TempDir::new().unwrap();
        let json = format!(
            r#"{{"auths": {{"docker-registry.default.svc:5000": {{"auth": "{}"}}}}}}"#,
            encoded("serviceaccount", "token")
        );
        let path = write_config(&dir, ".dockerconfigjson", &json);

        let creds = RegistryCredentials::from_secret_file(&path, "registry.internal")
            .unwrap()
            .unwrap();
        assert_eq!(creds.server, "registry.internal");
        assert_eq!(creds.username, "serviceaccount");
        assert_eq!(creds.password, "token");
    }

    #[test]
    fn test_basic_auth_value() {
        let creds = RegistryCredentials::new("ghcr.io", "user", "pass");
        assert_eq!(creds.basic_auth_value(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = RegistryCredentials::new("ghcr.io", "user", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
