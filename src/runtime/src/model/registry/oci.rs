//! OCI distribution transport.
//!
//! Tags are resolved and blobs fetched with the `oci-distribution` client.
//! Blob uploads, existence checks and index publication go over plain
//! authenticated HTTP so that uploads stream from disk and the published
//! index is exactly the bytes the caller hashed.

use std::sync::Arc;

use a3s_model_core::config::RegistryConfig;
use a3s_model_core::digest::Digest;
use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::{media_type, Descriptor};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::io::AsyncWrite;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;

use super::{BlobReader, RegistryConnector, RegistryIndex, RegistryTransport, ResolvedIndex};
use crate::model::reference::ModelPath;

/// Body chunk size for blob uploads.
const UPLOAD_CHUNK: usize = 256 * 1024;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Creates [`OciTransport`]s from a shared [`RegistryConfig`].
#[derive(Debug, Clone, Default)]
pub struct OciConnector {
    config: RegistryConfig,
}

impl OciConnector {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RegistryConnector for OciConnector {
    async fn connect(&self, path: &ModelPath) -> Result<Arc<dyn RegistryTransport>> {
        Ok(Arc::new(OciTransport::new(&self.config, path)?))
    }
}

/// Transport for one repository on an OCI registry.
pub struct OciTransport {
    client: Client,
    auth: RegistryAuth,
    http: reqwest::Client,
    /// Registry host actually contacted
    host: String,
    /// `<namespace>/<name>`
    repository: String,
    plain_http: bool,
    /// Bearer tokens per operation, `None` when the registry issued none
    pull_token: OnceCell<Option<String>>,
    push_token: OnceCell<Option<String>>,
}

impl OciTransport {
    pub fn new(config: &RegistryConfig, path: &ModelPath) -> Result<Self> {
        let host = config.host_for(&path.registry).to_string();
        let plain_http = config.insecure || path.is_plain_http();

        let client = Client::new(ClientConfig {
            protocol: if plain_http {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        });

        let auth = match config.credentials() {
            Some((user, password)) => RegistryAuth::Basic(user.to_string(), password.to_string()),
            None => RegistryAuth::Anonymous,
        };

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| ModelError::TransportError {
                registry: host.clone(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            auth,
            http,
            host,
            repository: path.namespace_repository(),
            plain_http,
            pull_token: OnceCell::new(),
            push_token: OnceCell::new(),
        })
    }

    fn error(&self, message: String) -> ModelError {
        ModelError::TransportError {
            registry: self.host.clone(),
            message,
        }
    }

    fn reference(&self, tag: &str) -> Result<Reference> {
        let reference = format!("{}/{}:{}", self.host, self.repository, tag);
        reference.parse::<Reference>().map_err(|e| {
            ModelError::InvalidReference(format!(
                "Invalid OCI reference '{}': {}",
                reference, e
            ))
        })
    }

    /// Reference used for blob operations, which only need the repository.
    fn blob_reference(&self) -> Result<Reference> {
        self.reference("latest")
    }

    /// Token for `operation`, fetched once per transport.
    async fn authenticate(&self, operation: RegistryOperation) -> Result<Option<String>> {
        let cell = match operation {
            RegistryOperation::Push => &self.push_token,
            RegistryOperation::Pull => &self.pull_token,
        };
        let token = cell
            .get_or_try_init(|| async {
                let reference = self.blob_reference()?;
                self.client
                    .auth(&reference, &self.auth, operation)
                    .await
                    .map_err(|e| self.error(format!("Authentication failed: {}", e)))
            })
            .await?;
        Ok(token.clone())
    }

    /// Attach the bearer token, or basic credentials when there is none.
    fn authorize(&self, request: RequestBuilder, token: Option<String>) -> RequestBuilder {
        match (token, &self.auth) {
            (Some(token), _) => request.bearer_auth(token),
            (None, RegistryAuth::Basic(user, password)) => request.basic_auth(user, Some(password)),
            (None, RegistryAuth::Anonymous) => request,
        }
    }

    fn scheme(&self) -> &'static str {
        if self.plain_http {
            "http"
        } else {
            "https"
        }
    }

    fn repository_url(&self, path: &str) -> String {
        format!(
            "{}://{}/v2/{}/{}",
            self.scheme(),
            self.host,
            self.repository,
            path
        )
    }

    /// Final `PUT` target for an upload session at `location`.
    ///
    /// Registries may answer with a relative location and may already carry
    /// query parameters on it.
    fn upload_url(&self, location: &str, digest: &Digest) -> String {
        let base = if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}://{}{}", self.scheme(), self.host, location)
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}digest={}", base, separator, digest)
    }

    /// Turn a non-success response into a transport error carrying its body.
    async fn check(&self, response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.error(format!("{} failed with {}: {}", action, status, body.trim())))
    }
}

/// Map a blob `HEAD` status to presence. `None` means the answer is an error.
fn blob_presence(status: StatusCode) -> Option<bool> {
    if status.is_success() {
        Some(true)
    } else if status == StatusCode::NOT_FOUND {
        Some(false)
    } else {
        None
    }
}

/// Content type and digest of index bytes about to be published as-is.
fn index_identity(index: &[u8]) -> Result<(String, Digest)> {
    let content_type = RegistryIndex::from_bytes(index)?
        .media_type
        .unwrap_or_else(|| media_type::OCI_IMAGE_MANIFEST.to_string());
    Ok((content_type, Digest::of_bytes(index)))
}

fn to_oci_descriptor(descriptor: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: descriptor.media_type.clone(),
        digest: descriptor.digest.to_string(),
        size: descriptor.size as i64,
        ..Default::default()
    }
}

#[async_trait]
impl RegistryTransport for OciTransport {
    async fn resolve(&self, tag: &str) -> Result<ResolvedIndex> {
        let reference = self.reference(tag)?;
        let (manifest, digest) = self
            .client
            .pull_image_manifest(&reference, &self.auth)
            .await
            .map_err(|e| self.error(format!("Failed to pull manifest {}: {}", reference, e)))?;

        let value = serde_json::to_value(&manifest)?;
        let index: RegistryIndex = serde_json::from_value(value)?;
        let digest = digest.parse::<Digest>()?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            layers = index.layers.len(),
            "Resolved tag"
        );
        Ok(ResolvedIndex { digest, index })
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        let token = self.authenticate(RegistryOperation::Pull).await?;
        let url = self.repository_url(&format!("blobs/{}", descriptor.digest));
        let response = self
            .authorize(self.http.head(&url), token)
            .send()
            .await
            .map_err(|e| {
                self.error(format!(
                    "Existence check for {} failed: {}",
                    descriptor.digest, e
                ))
            })?;

        let status = response.status();
        blob_presence(status).ok_or_else(|| {
            self.error(format!(
                "Existence check for {} returned {}",
                descriptor.digest, status
            ))
        })
    }

    async fn fetch(
        &self,
        descriptor: &Descriptor,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        self.authenticate(RegistryOperation::Pull).await?;
        let reference = self.blob_reference()?;
        self.client
            .pull_blob(&reference, &to_oci_descriptor(descriptor), out)
            .await
            .map_err(|e| self.error(format!("Failed to pull blob {}: {}", descriptor.digest, e)))
    }

    async fn push(&self, descriptor: &Descriptor, blob: BlobReader) -> Result<()> {
        let token = self.authenticate(RegistryOperation::Push).await?;

        let started = self
            .authorize(self.http.post(self.repository_url("blobs/uploads/")), token.clone())
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| self.error(format!("Failed to start upload: {}", e)))?;
        let started = self.check(started, "Starting upload").await?;
        let location = started
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| self.error("Upload session has no location".to_string()))?
            .to_string();

        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(blob, UPLOAD_CHUNK));
        let finished = self
            .authorize(
                self.http.put(self.upload_url(&location, &descriptor.digest)),
                token,
            )
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, descriptor.size)
            .body(body)
            .send()
            .await
            .map_err(|e| self.error(format!("Failed to push blob {}: {}", descriptor.digest, e)))?;
        self.check(finished, &format!("Pushing blob {}", descriptor.digest))
            .await?;

        tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Uploaded blob");
        Ok(())
    }

    async fn push_tagged(&self, tag: &str, index: Vec<u8>) -> Result<Digest> {
        let token = self.authenticate(RegistryOperation::Push).await?;
        let (content_type, digest) = index_identity(&index)?;

        let response = self
            .authorize(
                self.http.put(self.repository_url(&format!("manifests/{}", tag))),
                token,
            )
            .header(CONTENT_TYPE, content_type)
            .body(index)
            .send()
            .await
            .map_err(|e| self.error(format!("Failed to push index for {}: {}", tag, e)))?;
        let response = self.check(response, &format!("Publishing {}", tag)).await?;

        let reported = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Digest>().ok());
        if let Some(reported) = reported.filter(|reported| reported != &digest) {
            return Err(self.error(format!(
                "Registry stored {} as {}, expected {}",
                tag, reported, digest
            )));
        }

        tracing::debug!(tag, digest = %digest, "Published index");
        Ok(digest)
    }
}
