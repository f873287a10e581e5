//! RuntimeClient - the capability through which inspection talks to the
//! container engine.

use std::pin::Pin;

use async_trait::async_trait;
use image_inspector_core::error::Result;
use image_inspector_core::types::{Change, ContainerDescriptor, ImageDescriptor};
use tokio::io::{AsyncRead, DuplexStream};

use crate::auth::CredentialEntry;

/// Byte stream returned by the engine (archive downloads).
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Parameters for pulling an image.
///
/// The engine's progress feed is written to `output`; the client drops it
/// once the pull response has been fully forwarded, which ends the stream
/// for the reader.
#[derive(Debug)]
pub struct PullImageOptions {
    pub repository: String,
    pub tag: Option<String>,
    pub output: DuplexStream,
}

/// Parameters for creating a (never started) container.
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub image: String,
    pub name: Option<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
}

/// Parameters for removing a container.
#[derive(Debug, Clone, Default)]
pub struct RemoveContainerOptions {
    pub id: String,
    pub force: bool,
    pub remove_volumes: bool,
}

/// Parameters for downloading a path out of a container as a tar archive.
#[derive(Debug, Clone)]
pub struct DownloadFromContainerOptions {
    pub path: String,
}

impl Default for DownloadFromContainerOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
        }
    }
}

/// Container engine operations used by the inspector.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Inspect a local image. Missing images are reported as errors.
    async fn inspect_image(&self, name: &str) -> Result<ImageDescriptor>;

    /// Inspect a container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerDescriptor>;

    /// List filesystem changes of a container relative to its image.
    async fn container_changes(&self, id: &str) -> Result<Vec<Change>>;

    /// Pull an image, streaming the engine's JSON progress feed into
    /// `options.output`.
    async fn pull_image(&self, options: PullImageOptions, auth: &CredentialEntry) -> Result<()>;

    /// Create a container without starting it.
    async fn create_container(&self, options: CreateContainerOptions) -> Result<ContainerDescriptor>;

    /// Remove a container.
    async fn remove_container(&self, options: RemoveContainerOptions) -> Result<()>;

    /// Download `options.path` of a container as an uncompressed tar stream.
    async fn download_from_container(
        &self,
        id: &str,
        options: DownloadFromContainerOptions,
    ) -> Result<ByteStream>;
}

/// Split an image reference into repository and tag.
///
/// References pinned by digest are passed through whole as the repository.
pub fn parse_repository_tag(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => (&image[..idx], Some(&image[idx + 1..])),
        _ => (image, None),
    }
}
