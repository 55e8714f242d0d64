//! Distribution API v2 client.
//!
//! Manifest, config blob, upload and tag traffic goes through `oci-distribution`,
//! which negotiates Basic or Bearer authentication per repository.
//!
//! Two calls are sent directly: blob existence checks (the client has no blob
//! HEAD) and cross-repository mounts. A mount token must grant pull on the source
//! repository as well as push on the target, so those requests carry their own
//! scope set and token cache.

use std::collections::HashMap;

use async_trait::async_trait;
use hoist_core::config::BuilderConfig;
use hoist_core::error::{HoistError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Deserialize;

use super::RegistryPort;
use crate::oci::digest::digest_of_bytes;
use crate::oci::manifest::ACCEPTED_MANIFEST_TYPES;
use crate::oci::{ContainerConfig, Digest, Manifest, RegistryCredentials};

const DEFAULT_TAG_PAGE_SIZE: usize = 100;

/// Registry reached over HTTP(S).
pub struct HttpRegistry {
    /// Registry host with optional port, e.g. `registry.internal:5000`.
    registry: String,
    base_url: String,
    client: Client,
    http: reqwest::Client,
    /// Used for read calls, and for pushes when the caller passes none.
    credentials: Option<RegistryCredentials>,
    /// Bearer tokens for direct requests, keyed by the scope set they cover.
    tokens: Mutex<HashMap<String, String>>,
    tag_page_size: usize,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl HttpRegistry {
    /// Client for the registry named in the builder configuration.
    pub fn from_config(config: &BuilderConfig) -> Result<Self> {
        let protocol = if config.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        let http = reqwest::Client::builder()
            .user_agent(format!("hoist/{}", hoist_core::VERSION))
            .build()
            .map_err(|e| HoistError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            registry: config.registry.trim_end_matches('/').to_string(),
            base_url: config.registry_url().trim_end_matches('/').to_string(),
            client,
            http,
            credentials: None,
            tokens: Mutex::new(HashMap::new()),
            tag_page_size: DEFAULT_TAG_PAGE_SIZE,
        })
    }

    pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Number of tags requested per page when listing.
    pub fn with_tag_page_size(mut self, size: usize) -> Self {
        self.tag_page_size = size.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, repository: &str, path: &str) -> String {
        format!("{}/v2/{}/{}", self.base_url, repository, path)
    }

    /// Reference to `repository` in this registry, by digest or by tag.
    fn reference(&self, operation: &'static str, repository: &str, reference: &str) -> Result<Reference> {
        let separator = if reference.parse::<Digest>().is_ok() { '@' } else { ':' };
        let image = format!("{}/{}{}{}", self.registry, repository, separator, reference);
        image.parse::<Reference>().map_err(|e| {
            HoistError::transport(operation, repository, format!("Invalid reference '{}': {}", image, e))
        })
    }

    /// Let the client negotiate a token for `operation` on the image's repository.
    async fn authenticate(
        &self,
        operation: &'static str,
        image: &Reference,
        auth: &RegistryAuth,
        scope: RegistryOperation,
    ) -> Result<()> {
        self.client
            .auth(image, auth, scope)
            .await
            .map_err(|e| HoistError::transport(operation, image.repository(), format!("Authentication failed: {}", e)))?;
        Ok(())
    }

    async fn dispatch(
        &self,
        operation: &'static str,
        repository: &str,
        method: Method,
        url: &str,
        authorization: Option<String>,
    ) -> Result<Response> {
        let mut request = self.http.request(method, url);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        request
            .send()
            .await
            .map_err(|e| HoistError::transport(operation, repository, e))
    }

    /// Send a bodiless request, answering one Bearer challenge with a token for `scopes`.
    async fn send(
        &self,
        operation: &'static str,
        repository: &str,
        method: Method,
        url: &str,
        scopes: &[String],
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Response> {
        let key = scopes.join(" ");
        let authorization = self
            .tokens
            .lock()
            .get(&key)
            .map(|token| format!("Bearer {}", token))
            .or_else(|| credentials.map(RegistryCredentials::basic_auth_value));
        let response = self
            .dispatch(operation, repository, method.clone(), url, authorization)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerChallenge::parse);
        let Some(challenge) = challenge else {
            return Ok(response);
        };

        tracing::debug!(
            repository,
            realm = %challenge.realm,
            scopes = %key,
            "Registry requested bearer token"
        );

        let token = self
            .fetch_token(&challenge, scopes, operation, repository, credentials)
            .await?;
        self.tokens.lock().insert(key, token.clone());

        self.dispatch(operation, repository, method, url, Some(format!("Bearer {}", token)))
            .await
    }

    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        scopes: &[String],
        operation: &'static str,
        repository: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let mut url = Url::parse(&challenge.realm)
            .map_err(|e| HoistError::transport(operation, repository, format!("Invalid token realm: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            for scope in scopes {
                query.append_pair("scope", scope);
            }
            if let Some(scope) = &challenge.scope {
                if !scopes.contains(scope) {
                    query.append_pair("scope", scope);
                }
            }
        }

        let mut token_request = self.http.get(url);
        if let Some(credentials) = credentials {
            token_request = token_request.header(AUTHORIZATION, credentials.basic_auth_value());
        }
        let response = token_request
            .send()
            .await
            .map_err(|e| HoistError::transport(operation, repository, format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(HoistError::transport(
                operation,
                repository,
                format!("Token request returned {}", response.status()),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| HoistError::transport(operation, repository, format!("Invalid token response: {}", e)))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| HoistError::transport(operation, repository, "Token response carried no token"))
    }
}

fn registry_auth(credentials: Option<&RegistryCredentials>) -> RegistryAuth {
    match credentials {
        Some(credentials) => {
            RegistryAuth::Basic(credentials.username.clone(), credentials.password.clone())
        }
        None => RegistryAuth::Anonymous,
    }
}

fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

fn push_scope(repository: &str) -> String {
    format!("repository:{}:pull,push", repository)
}

fn is_not_found(error: &OciDistributionError) -> bool {
    match error {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown | OciErrorCode::BlobUnknown
            )
        }),
        _ => false,
    }
}

fn map_error(
    operation: &'static str,
    repository: &str,
    reference: &str,
    error: OciDistributionError,
) -> HoistError {
    if is_not_found(&error) {
        return HoistError::NotFound {
            repository: repository.to_string(),
            reference: reference.to_string(),
        };
    }
    HoistError::transport(operation, repository, error)
}

fn verify_digest(data: &[u8], expected: &Digest, subject: String) -> Result<()> {
    let actual = digest_of_bytes(data);
    if &actual != expected {
        return Err(HoistError::DigestMismatch {
            subject,
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl RegistryPort for HttpRegistry {
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        const OP: &str = "GET manifest";
        let image = self.reference(OP, repository, reference)?;
        let auth = registry_auth(self.credentials.as_ref());
        self.authenticate(OP, &image, &auth, RegistryOperation::Pull).await?;

        let (data, _) = self
            .client
            .pull_manifest_raw(&image, &auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| map_error(OP, repository, reference, e))?;

        if let Ok(digest) = reference.parse::<Digest>() {
            verify_digest(&data, &digest, format!("manifest {}@{}", repository, reference))?;
        }
        Manifest::from_slice(&data)
    }

    async fn get_container_config(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<ContainerConfig> {
        const OP: &str = "GET blob";
        let image = self.reference(OP, repository, &digest.to_string())?;
        let auth = registry_auth(self.credentials.as_ref());
        self.authenticate(OP, &image, &auth, RegistryOperation::Pull).await?;

        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };
        let mut data = Vec::new();
        self.client
            .pull_blob(&image, &descriptor, &mut data)
            .await
            .map_err(|e| map_error(OP, repository, &digest.to_string(), e))?;

        verify_digest(&data, digest, format!("config blob in {}", repository))?;
        ContainerConfig::from_slice(&data)
    }

    async fn layer_exists(&self, repository: &str, digest: &Digest) -> Result<bool> {
        const OP: &str = "HEAD blob";
        let url = self.url(repository, &format!("blobs/{}", digest));
        let response = self
            .send(
                OP,
                repository,
                Method::HEAD,
                &url,
                &[pull_scope(repository)],
                self.credentials.as_ref(),
            )
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(HoistError::transport(
                OP,
                repository,
                format!("{} for {}", status, digest),
            )),
        }
    }

    async fn mount_layer(
        &self,
        source_repository: &str,
        target_repository: &str,
        digest: &Digest,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        const OP: &str = "POST blob mount";
        let mut url = Url::parse(&self.url(target_repository, "blobs/uploads/"))
            .map_err(|e| HoistError::transport(OP, target_repository, e))?;
        url.query_pairs_mut()
            .append_pair("mount", &digest.to_string())
            .append_pair("from", source_repository);

        let scopes = [push_scope(target_repository), pull_scope(source_repository)];
        let response = self
            .send(
                OP,
                target_repository,
                Method::POST,
                url.as_str(),
                &scopes,
                credentials.or(self.credentials.as_ref()),
            )
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::debug!(
                    from = source_repository,
                    to = target_repository,
                    digest = %digest,
                    "Mounted blob"
                );
                Ok(())
            }
            // The registry opened an upload session instead of mounting.
            StatusCode::ACCEPTED => Err(HoistError::transport(
                OP,
                target_repository,
                format!(
                    "registry did not mount {} from {}; the source blob is not reachable",
                    digest, source_repository
                ),
            )),
            StatusCode::NOT_FOUND => Err(HoistError::NotFound {
                repository: source_repository.to_string(),
                reference: digest.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(HoistError::transport(
                    OP,
                    target_repository,
                    format!("{} {}", status, body.trim()),
                ))
            }
        }
    }

    async fn push_layer(
        &self,
        blob: Vec<u8>,
        repository: &str,
        digest: &Digest,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        const OP: &str = "PUT blob";
        let image = self.reference(OP, repository, "latest")?;
        let auth = registry_auth(credentials.or(self.credentials.as_ref()));
        self.authenticate(OP, &image, &auth, RegistryOperation::Push).await?;

        self.client
            .push_blob(&image, &blob, &digest.to_string())
            .await
            .map_err(|e| HoistError::transport(OP, repository, format!("{} ({})", e, digest)))?;

        tracing::debug!(repository, digest = %digest, size = blob.len(), "Uploaded blob");
        Ok(())
    }

    async fn push_manifest(
        &self,
        manifest: &[u8],
        content_type: &str,
        repository: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<()> {
        const OP: &str = "PUT manifest";
        let image = self.reference(OP, repository, tag)?;
        let auth = registry_auth(credentials.or(self.credentials.as_ref()));
        self.authenticate(OP, &image, &auth, RegistryOperation::Push).await?;

        let header = content_type.parse().map_err(|e| {
            HoistError::transport(OP, repository, format!("Invalid content type '{}': {}", content_type, e))
        })?;
        self.client
            .push_manifest_raw(&image, manifest.to_vec(), header)
            .await
            .map_err(|e| HoistError::transport(OP, repository, e))?;

        tracing::debug!(repository, tag, digest = %digest_of_bytes(manifest), "Pushed manifest");
        Ok(())
    }

    async fn get_tags(&self, repository: &str) -> Result<Vec<String>> {
        const OP: &str = "GET tags";
        let image = self.reference(OP, repository, "latest")?;
        let auth = registry_auth(self.credentials.as_ref());
        self.authenticate(OP, &image, &auth, RegistryOperation::Pull).await?;

        let mut tags: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let page = match self
                .client
                .list_tags(&image, &auth, Some(self.tag_page_size), last.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) if is_not_found(&e) => {
                    tracing::debug!(repository, "Repository has no tags yet");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(HoistError::transport(OP, repository, e)),
            };

            let count = page.tags.len();
            let next = page.tags.last().cloned();
            tags.extend(page.tags);
            if count < self.tag_page_size || next.is_none() || next == last {
                break;
            }
            last = next;
        }

        Ok(tags)
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = HashMap::new();
        let mut remaining = rest.trim();
        while !remaining.is_empty() {
            let (key, after) = remaining.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            let after = after.trim_start();
            // Quoted values may contain commas (scope lists).
            let (value, tail) = match after.strip_prefix('"') {
                Some(quoted) => {
                    let end = quoted.find('"')?;
                    (&quoted[..end], &quoted[end + 1..])
                }
                None => match after.find(',') {
                    Some(i) => (&after[..i], &after[i..]),
                    None => (after, ""),
                },
            };
            params.insert(key, value.trim().to_string());
            remaining = tail.trim_start().trim_start_matches(',').trim_start();
        }

        Some(Self {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}
