//! Blocking client for the OCI Distribution API.
//!
//! Covers the handful of endpoints an append needs (manifest get/put, blob
//! get/head and monolithic upload) plus the two authentication schemes
//! registries use in practice: HTTP basic and bearer tokens obtained from the
//! realm named in a `WWW-Authenticate` challenge. Requests are not retried.

use super::{BlobStream, ReadChunks, RegistryClient};
use crate::digest;
use crate::error::AppendError;
use crate::image::{DOCKER_MANIFEST_V2, DOCKER_MANIFEST_LIST_V2};
use crate::reference::{ImageReference, DEFAULT_REGISTRY};
use anyhow::{anyhow, Context, Result};
use oci_spec::image::MediaType;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;

/// Host serving the API for references that name `docker.io`.
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// Credentials for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => request.basic_auth(u, Some(p)),
            _ => request,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// [`RegistryClient`] bound to one repository of a remote registry.
pub struct DistributionClient {
    http: Client,
    repository_url: Url,
    display_name: String,
    auth: RegistryAuth,
    bearer_token: RefCell<Option<String>>,
}

impl DistributionClient {
    /// Creates a client for the repository of `reference`. With `insecure`, the
    /// registry is spoken to over plain HTTP.
    pub fn new(reference: &ImageReference, auth: RegistryAuth, insecure: bool) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let repository_url = repository_url(reference, insecure)?;
        log::debug!("Registry endpoint: {}", repository_url);

        Ok(Self {
            http,
            repository_url,
            display_name: reference.repository_name(),
            auth,
            bearer_token: RefCell::new(None),
        })
    }

    fn blob_endpoint(&self, digest: &str) -> Result<Url> {
        if !digest::is_sha256_digest(digest) {
            return Err(anyhow!("Malformed blob digest: {}", digest));
        }
        self.endpoint(&format!("blobs/{}", digest))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.repository_url
            .join(path)
            .with_context(|| format!("Invalid registry path: {}", path))
    }

    /// Sends a request, answering one authentication challenge if the registry
    /// raises it. `build` is called again for the retried request.
    fn send<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.authorize(build(&self.http)).send().with_context(|| {
            format!("Registry {} request to {} failed", operation, self.display_name)
        })?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        match challenge.as_deref().and_then(parse_bearer_challenge) {
            Some(params) => {
                log::debug!("Registry requested bearer authentication for {}", operation);
                let token = self.fetch_token(&params)?;
                *self.bearer_token.borrow_mut() = Some(token);
            }
            None => return Ok(response),
        }

        self.authorize(build(&self.http)).send().with_context(|| {
            format!("Registry {} request to {} failed", operation, self.display_name)
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.bearer_token.borrow().as_ref() {
            Some(token) => request.bearer_auth(token),
            None => self.auth.apply(request),
        }
    }

    fn fetch_token(&self, params: &HashMap<String, String>) -> Result<String> {
        let realm = params
            .get("realm")
            .ok_or_else(|| anyhow!("Bearer challenge without realm"))?;
        let mut url = Url::parse(realm).with_context(|| format!("Invalid token realm: {}", realm))?;
        {
            let mut query = url.query_pairs_mut();
            for key in ["service", "scope"] {
                if let Some(value) = params.get(key) {
                    query.append_pair(key, value);
                }
            }
        }

        let response = self
            .auth
            .apply(self.http.get(url))
            .send()
            .context("Token request failed")?;
        let response = ensure_success(response, "token request")?;
        let body: TokenResponse = serde_json::from_slice(
            &response.bytes().context("Failed to read token response")?,
        )
        .context("Token response is not valid JSON")?;

        body.token
            .or(body.access_token)
            .ok_or_else(|| anyhow!("Token response carries no token"))
    }

    fn blob_exists(&self, digest: &str) -> Result<bool> {
        let url = self.blob_endpoint(digest)?;
        let response = self.send("blob check", |http| http.head(url.clone()))?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => ensure_success(response, "blob check").map(|_| false),
        }
    }
}

impl RegistryClient for DistributionClient {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn repository(&self) -> Option<&str> {
        Some(&self.display_name)
    }

    fn pull_blob(&self, digest: &str) -> Result<BlobStream<'_>> {
        let url = self.blob_endpoint(digest)?;
        let response = self.send("blob pull", |http| http.get(url.clone()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppendError::BlobUnknown(digest.to_string()).into());
        }
        let response = ensure_success(response, "blob pull")?;
        Ok(Box::new(ReadChunks::new(response)))
    }

    fn push_blob(&self, data: &[u8], digest: &str) -> Result<()> {
        if self.blob_exists(digest)? {
            log::debug!(
                "Blob {} already present, skipping upload",
                digest::short_digest(digest)
            );
            return Ok(());
        }

        let uploads = self.endpoint("blobs/uploads/")?;
        let response = self.send("blob upload start", |http| http.post(uploads.clone()))?;
        let response = ensure_success(response, "blob upload start")?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow!("Registry did not return an upload location"))?;

        let mut upload_url = self
            .repository_url
            .join(location)
            .with_context(|| format!("Invalid upload location: {}", location))?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let response = self.send("blob upload", |http| {
            http.put(upload_url.clone())
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(data.to_vec())
        })?;
        ensure_success(response, "blob upload")?;
        log::debug!(
            "Uploaded blob {} ({} bytes)",
            digest::short_digest(digest),
            data.len()
        );
        Ok(())
    }

    fn get_manifest(&self, tag: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("manifests/{}", tag))?;
        let accept = [
            DOCKER_MANIFEST_V2.to_string(),
            MediaType::ImageManifest.to_string(),
            DOCKER_MANIFEST_LIST_V2.to_string(),
            MediaType::ImageIndex.to_string(),
        ]
        .join(", ");

        let response = self.send("manifest get", |http| {
            http.get(url.clone()).header(ACCEPT, accept.as_str())
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppendError::ManifestUnknown(tag.to_string()).into());
        }
        let response = ensure_success(response, "manifest get")?;
        Ok(response
            .bytes()
            .context("Failed to read manifest body")?
            .to_vec())
    }

    fn set_manifest(&self, tag: &str, manifest: &[u8]) -> Result<()> {
        let url = self.endpoint(&format!("manifests/{}", tag))?;
        let content_type = manifest_content_type(manifest);

        let response = self.send("manifest put", |http| {
            http.put(url.clone())
                .header(CONTENT_TYPE, content_type.as_str())
                .body(manifest.to_vec())
        })?;
        ensure_success(response, "manifest put")?;
        Ok(())
    }
}

fn repository_url(reference: &ImageReference, insecure: bool) -> Result<Url> {
    let host = if reference.registry == DEFAULT_REGISTRY {
        DOCKER_HUB_API_HOST
    } else {
        reference.registry.as_str()
    };
    let scheme = if insecure { "http" } else { "https" };
    let url = format!("{}://{}/v2/{}/", scheme, host, reference.repository);
    Url::parse(&url).with_context(|| format!("Invalid registry URL: {}", url))
}

/// The `mediaType` a manifest declares about itself, OCI manifest otherwise.
fn manifest_content_type(manifest: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(manifest)
        .ok()
        .and_then(|document| {
            document
                .get("mediaType")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| MediaType::ImageManifest.to_string())
}

fn ensure_success(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let message: String = body.trim().chars().take(512).collect();
    Err(AppendError::Registry {
        operation: operation.to_string(),
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("no details").to_string()
        } else {
            message
        },
    }
    .into())
}

/// Parses `Bearer realm="...",service="...",scope="..."` into its parameters.
/// Returns `None` for other schemes.
fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Some(params)
}
