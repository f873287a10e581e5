//! Docker Engine API client.
//!
//! Implements [`RuntimeClient`] over the engine's HTTP API, reached through
//! a Unix socket or plain TCP. Each request opens its own HTTP/1.1
//! connection.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hyper::body::{Bytes, HttpBody};
use hyper::client::conn;
use hyper::{Body, Method, Request, Response};
use image_inspector_core::error::{InspectorError, Result};
use image_inspector_core::types::{Change, ContainerDescriptor, ImageDescriptor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use url::form_urlencoded;

use crate::auth::CredentialEntry;
use crate::client::{
    ByteStream, CreateContainerOptions, DownloadFromContainerOptions, PullImageOptions,
    RemoveContainerOptions, RuntimeClient,
};

/// Engine API version used in request paths.
const API_VERSION: &str = "v1.41";

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    fn parse(uri: &str) -> Result<Self> {
        if let Some(path) = uri.strip_prefix("unix://") {
            if !path.is_empty() {
                return Ok(Self::Unix(PathBuf::from(path)));
            }
        } else if let Some(addr) = uri
            .strip_prefix("tcp://")
            .or_else(|| uri.strip_prefix("http://"))
        {
            let addr = addr.trim_end_matches('/');
            if addr.contains(':') && !addr.starts_with(':') {
                return Ok(Self::Tcp(addr.to_string()));
            }
        }
        Err(InspectorError::DaemonConnect("invalid endpoint".to_string()))
    }
}

/// Client for a Docker-compatible engine.
#[derive(Debug, Clone)]
pub struct DockerClient {
    endpoint: Endpoint,
}

impl DockerClient {
    /// Create a client for `uri` (`unix:///path` or `tcp://host:port`).
    ///
    /// No connection is made until the first request.
    pub fn new(uri: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(uri)?;
        tracing::debug!(endpoint = ?endpoint, "Using container engine endpoint");
        Ok(Self { endpoint })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, String)],
        body: Body,
    ) -> Result<Response<Body>> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("/{}{}", API_VERSION, path))
            .header(hyper::header::HOST, "docker")
            .header(hyper::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(body)
            .map_err(|e| InspectorError::Other(format!("Invalid engine request: {}", e)))?;

        let response = match &self.endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    InspectorError::DaemonConnect(format!("{}: {}", path.display(), e))
                })?;
                send(stream, request).await?
            }
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| InspectorError::DaemonConnect(format!("{}: {}", addr, e)))?;
                send(stream, request).await?
            }
        };

        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(Method::GET, path, &[], Body::empty()).await?;
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(request_err)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn inspect_image(&self, name: &str) -> Result<ImageDescriptor> {
        self.get_json(&format!("/images/{}/json", name)).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDescriptor> {
        self.get_json(&format!("/containers/{}/json", id)).await
    }

    async fn container_changes(&self, id: &str) -> Result<Vec<Change>> {
        // The engine answers `null` for a container without changes.
        let changes: Option<Vec<Change>> =
            self.get_json(&format!("/containers/{}/changes", id)).await?;
        Ok(changes.unwrap_or_default())
    }

    async fn pull_image(&self, options: PullImageOptions, auth: &CredentialEntry) -> Result<()> {
        let PullImageOptions {
            repository,
            tag,
            mut output,
        } = options;

        let mut params = vec![("fromImage", repository.as_str())];
        if let Some(tag) = &tag {
            params.push(("tag", tag.as_str()));
        }
        let path = format!("/images/create?{}", encode_query(&params));
        let headers = [("X-Registry-Auth", encode_registry_auth(auth)?)];

        tracing::info!(
            repository = %repository,
            tag = tag.as_deref().unwrap_or("latest"),
            registry = %auth.registry,
            "Pulling image"
        );

        let response = self
            .request(Method::POST, &path, &headers, Body::empty())
            .await?;
        let mut body = BodyReader::new(response.into_body());
        tokio::io::copy(&mut body, &mut output).await?;
        output.shutdown().await?;
        Ok(())
    }

    async fn create_container(&self, options: CreateContainerOptions) -> Result<ContainerDescriptor> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct CreateBody<'a> {
            image: &'a str,
            entrypoint: &'a [String],
            cmd: &'a [String],
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct CreateResponse {
            id: String,
        }

        let mut path = "/containers/create".to_string();
        if let Some(name) = &options.name {
            path = format!("{}?{}", path, encode_query(&[("name", name.as_str())]));
        }
        let body = serde_json::to_vec(&CreateBody {
            image: &options.image,
            entrypoint: &options.entrypoint,
            cmd: &options.cmd,
        })?;

        let response = self
            .request(Method::POST, &path, &[], Body::from(body))
            .await?;
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(request_err)?;
        let created: CreateResponse = serde_json::from_slice(&bytes)?;

        tracing::info!(container = %created.id, image = %options.image, "Created container");

        Ok(ContainerDescriptor {
            id: created.id,
            name: options.name.unwrap_or_default(),
            image: options.image,
            state: None,
        })
    }

    async fn remove_container(&self, options: RemoveContainerOptions) -> Result<()> {
        let query = encode_query(&[
            ("force", bool_param(options.force)),
            ("v", bool_param(options.remove_volumes)),
        ]);
        let path = format!("/containers/{}?{}", options.id, query);

        let response = self
            .request(Method::DELETE, &path, &[], Body::empty())
            .await?;
        hyper::body::to_bytes(response.into_body())
            .await
            .map_err(request_err)?;

        tracing::info!(container = %options.id, "Removed container");
        Ok(())
    }

    async fn download_from_container(
        &self,
        id: &str,
        options: DownloadFromContainerOptions,
    ) -> Result<ByteStream> {
        let query = encode_query(&[("path", options.path.as_str())]);
        let path = format!("/containers/{}/archive?{}", id, query);

        let response = self.request(Method::GET, &path, &[], Body::empty()).await?;
        Ok(Box::pin(BodyReader::new(response.into_body())))
    }
}

/// Run one request over a fresh HTTP/1.1 connection.
async fn send<T>(io: T, request: Request<Body>) -> Result<Response<Body>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = conn::handshake(io).await.map_err(request_err)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Engine connection closed with error");
        }
    });
    sender.send_request(request).await.map_err(request_err)
}

/// Turn a non-success response into `InspectorError::Api`.
async fn check_status(response: Response<Body>) -> Result<Response<Body>> {
    if response.status().is_success() {
        return Ok(response);
    }

    #[derive(Deserialize)]
    struct ApiMessage {
        message: String,
    }

    let status = response.status().as_u16();
    let bytes = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap_or_default();
    let message = serde_json::from_slice::<ApiMessage>(&bytes)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());

    Err(InspectorError::Api { status, message })
}

/// `X-Registry-Auth` header value for a credential.
fn encode_registry_auth(auth: &CredentialEntry) -> Result<String> {
    #[derive(Serialize)]
    struct AuthConfig<'a> {
        username: &'a str,
        password: &'a str,
        email: &'a str,
        serveraddress: &'a str,
    }

    let json = serde_json::to_vec(&AuthConfig {
        username: &auth.username,
        password: &auth.password,
        email: &auth.email,
        serveraddress: &auth.registry,
    })?;
    Ok(URL_SAFE.encode(json))
}

/// URL-encoded query string.
fn encode_query(params: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn request_err(e: hyper::Error) -> InspectorError {
    InspectorError::Other(format!("Engine request failed: {}", e))
}

/// Exposes a response body as an `AsyncRead`, surfacing transport errors
/// as read errors instead of a silent end of stream.
struct BodyReader {
    body: Body,
    pending: Bytes,
}

impl BodyReader {
    fn new(body: Body) -> Self {
        Self {
            body,
            pending: Bytes::new(),
        }
    }
}

impl AsyncRead for BodyReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        while self.pending.is_empty() {
            match Pin::new(&mut self.body).poll_data(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.pending = chunk,
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)))
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = self.pending.len().min(buf.remaining());
        let rest = self.pending.split_off(n);
        buf.put_slice(&self.pending);
        self.pending = rest;
        Poll::Ready(Ok(()))
    }
}
