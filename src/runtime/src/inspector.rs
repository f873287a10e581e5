//! Inspection pipeline.
//!
//! Acquires the image or container, materializes its filesystem into a
//! destination directory and hands that directory to the registered
//! scanners.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image_inspector_core::config::InspectionOptions;
use image_inspector_core::error::{InspectorError, Result};
use image_inspector_core::metadata::InspectorMetadata;
use tokio::io::AsyncWriteExt;

use crate::acquire::{AcquisitionResult, ImageAcquirer};
use crate::client::{
    ByteStream, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
    RuntimeClient,
};
use crate::docker::DockerClient;
use crate::layers::extract_layer_tar;
use crate::output_dir::{create_output_dir, DirOps, OsDirOps};

/// Entrypoint of the throwaway container; it is never started.
const PLACEHOLDER_ENTRYPOINT: &str = "/bin/true";

/// Consumer of an extracted filesystem.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Key under which results are stored in the metadata.
    fn name(&self) -> &str;

    /// Scan the filesystem rooted at `rootfs`.
    async fn scan(&self, rootfs: &Path, meta: &InspectorMetadata) -> Result<serde_json::Value>;
}

/// Runs one inspection.
pub struct Inspector {
    opts: InspectionOptions,
    client: Option<Arc<dyn RuntimeClient>>,
    dir_ops: Box<dyn DirOps>,
    scanners: Vec<Box<dyn Scanner>>,
}

impl Inspector {
    /// Inspector talking to the engine at `opts.docker_uri`.
    pub fn new(opts: InspectionOptions) -> Self {
        Self {
            opts,
            client: None,
            dir_ops: Box::new(OsDirOps),
            scanners: Vec::new(),
        }
    }

    /// Use `client` instead of connecting to `opts.docker_uri`.
    pub fn with_client(mut self, client: Arc<dyn RuntimeClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Prepare destination directories through `dir_ops`.
    pub fn with_dir_ops(mut self, dir_ops: Box<dyn DirOps>) -> Self {
        self.dir_ops = dir_ops;
        self
    }

    pub fn with_scanner(mut self, scanner: Box<dyn Scanner>) -> Self {
        self.scanners.push(scanner);
        self
    }

    /// Run the pipeline and return the directory holding the filesystem.
    ///
    /// Failures before extraction are recorded in
    /// `meta.image_acquire_error`; a generated destination directory is
    /// removed again if extraction fails.
    pub async fn inspect(&self, meta: &mut InspectorMetadata) -> Result<PathBuf> {
        let client = match self.prepare() {
            Ok(client) => client,
            Err(e) => {
                meta.image_acquire_error = e.to_string();
                return Err(e);
            }
        };

        let acquired = ImageAcquirer::new(&self.opts, client.as_ref())
            .acquire(meta)
            .await?;

        let output = create_output_dir(
            self.opts.dst_path.as_deref(),
            &self.opts.temp_prefix,
            self.dir_ops.as_ref(),
        )?;

        if let Err(e) = self.materialize(client.as_ref(), &acquired, &output.path).await {
            if output.generated {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&output.path).await {
                    tracing::warn!(
                        path = %output.path.display(),
                        error = %cleanup,
                        "Unable to remove output directory"
                    );
                }
            }
            return Err(e);
        }

        tracing::info!(
            reference = %acquired.reference,
            path = %output.path.display(),
            "Extracted filesystem"
        );
        meta.extracted_path = Some(output.path.clone());

        for scanner in &self.scanners {
            tracing::debug!(scanner = scanner.name(), "Running scanner");
            let result = scanner.scan(&output.path, meta).await?;
            meta.scan_results.insert(scanner.name().to_string(), result);
        }

        Ok(output.path)
    }

    fn prepare(&self) -> Result<Arc<dyn RuntimeClient>> {
        self.opts.validate()?;
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => Ok(Arc::new(DockerClient::new(&self.opts.docker_uri)?)),
        }
    }

    async fn materialize(
        &self,
        client: &dyn RuntimeClient,
        acquired: &AcquisitionResult,
        destination: &Path,
    ) -> Result<()> {
        if self.opts.is_container_mode() {
            let archive = client
                .download_from_container(&acquired.reference, DownloadFromContainerOptions::default())
                .await?;
            return extract_archive(archive, destination).await;
        }

        let container = client
            .create_container(CreateContainerOptions {
                image: acquired.reference.clone(),
                name: None,
                entrypoint: vec![PLACEHOLDER_ENTRYPOINT.to_string()],
                cmd: Vec::new(),
            })
            .await?;

        let extracted = async {
            let archive = client
                .download_from_container(&container.id, DownloadFromContainerOptions::default())
                .await?;
            extract_archive(archive, destination).await
        }
        .await;

        let removed = client
            .remove_container(RemoveContainerOptions {
                id: container.id.clone(),
                force: true,
                remove_volumes: true,
            })
            .await;
        if let Err(e) = removed {
            tracing::warn!(container = %container.id, error = %e, "Unable to remove container");
        }

        extracted
    }
}

/// Spool a downloaded archive to disk, then extract it off the runtime.
async fn extract_archive(mut archive: ByteStream, destination: &Path) -> Result<()> {
    let (file, spool_path) = tempfile::NamedTempFile::new()?.into_parts();
    let mut spool = tokio::fs::File::from_std(file);
    let size = tokio::io::copy(&mut archive, &mut spool)
        .await
        .map_err(|e| InspectorError::TarRead(e.to_string()))?;
    spool.flush().await?;
    drop(spool);

    tracing::debug!(bytes = size, "Downloaded filesystem archive");

    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&spool_path)?;
        extract_layer_tar(BufReader::new(file), &destination)
    })
    .await
    .map_err(|e| InspectorError::Other(format!("Extraction task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_inspector_core::types::{Change, ContainerDescriptor, ImageDescriptor};
    use std::io;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::auth::CredentialEntry;
    use crate::client::PullImageOptions;

    /// Serves `archive` for every download and records removals.
    struct ArchiveClient {
        archive: Vec<u8>,
        removed: Mutex<Vec<String>>,
    }

    impl ArchiveClient {
        fn new(archive: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                archive,
                removed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RuntimeClient for ArchiveClient {
        async fn inspect_image(&self, _name: &str) -> Result<ImageDescriptor> {
            Ok(ImageDescriptor::default())
        }
        async fn inspect_container(&self, id: &str) -> Result<ContainerDescriptor> {
            Ok(ContainerDescriptor {
                id: id.to_string(),
                ..Default::default()
            })
        }
        async fn container_changes(&self, _id: &str) -> Result<Vec<Change>> {
            Ok(Vec::new())
        }
        async fn pull_image(&self, _options: PullImageOptions, _auth: &CredentialEntry) -> Result<()> {
            Ok(())
        }
        async fn create_container(&self, options: CreateContainerOptions) -> Result<ContainerDescriptor> {
            Ok(ContainerDescriptor {
                id: "throwaway".to_string(),
                image: options.image,
                ..Default::default()
            })
        }
        async fn remove_container(&self, options: RemoveContainerOptions) -> Result<()> {
            self.removed.lock().unwrap().push(options.id);
            Ok(())
        }
        async fn download_from_container(
            &self,
            _id: &str,
            _options: DownloadFromContainerOptions,
        ) -> Result<ByteStream> {
            Ok(Box::pin(io::Cursor::new(self.archive.clone())))
        }
    }

    struct CountingScanner;

    #[async_trait]
    impl Scanner for CountingScanner {
        fn name(&self) -> &str {
            "counter"
        }

        async fn scan(&self, rootfs: &Path, meta: &InspectorMetadata) -> Result<serde_json::Value> {
            assert!(meta.acquired());
            let entries = std::fs::read_dir(rootfs)?.count();
            Ok(serde_json::json!({ "entries": entries }))
        }
    }

    fn archive_with_file() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"hello";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o400);
        header.set_cksum();
        builder
            .append_data(&mut header, "rootfs/hello.txt", &data[..])
            .unwrap();
        builder.into_inner().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_acquire_error() {
        let mut opts = InspectionOptions::for_image("busybox");
        opts.docker_uri = "No such file".to_string();
        let mut meta = InspectorMetadata::new();

        assert!(Inspector::new(opts).inspect(&mut meta).await.is_err());
        assert!(meta.image_acquire_error.contains("invalid endpoint"));
    }

    #[tokio::test]
    async fn test_image_is_extracted_and_scanned() {
        let dest = TempDir::new().unwrap();
        let mut opts = InspectionOptions::for_image("busybox:latest");
        opts.dst_path = Some(dest.path().join("rootfs"));
        let client = ArchiveClient::new(archive_with_file());

        let mut meta = InspectorMetadata::new();
        let path = Inspector::new(opts)
            .with_client(client.clone())
            .with_scanner(Box::new(CountingScanner))
            .inspect(&mut meta)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(path.join("hello.txt")).unwrap(), "hello");
        assert_eq!(meta.extracted_path.as_deref(), Some(path.as_path()));
        assert_eq!(meta.scan_results["counter"]["entries"], 1);
        assert_eq!(*client.removed.lock().unwrap(), vec!["throwaway".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_extraction_cleans_up() {
        let client = ArchiveClient::new(b"definitely not a tar archive".repeat(40));
        let opts = InspectionOptions::for_image("busybox:latest");

        let mut meta = InspectorMetadata::new();
        let err = Inspector::new(opts)
            .with_client(client.clone())
            .inspect(&mut meta)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("reading tar"), "{}", err);
        assert!(meta.acquired());
        assert!(meta.extracted_path.is_none());
        assert_eq!(client.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_running_container_is_not_removed() {
        let dest = TempDir::new().unwrap();
        let mut opts = InspectionOptions::for_container("web");
        opts.dst_path = Some(dest.path().to_path_buf());
        let client = ArchiveClient::new(archive_with_file());

        let mut meta = InspectorMetadata::new();
        Inspector::new(opts)
            .with_client(client.clone())
            .inspect(&mut meta)
            .await
            .unwrap();

        assert!(dest.path().join("hello.txt").is_file());
        assert!(client.removed.lock().unwrap().is_empty());
        assert_eq!(meta.container.unwrap().id, "web");
    }

    /// Refuses to create anything.
    struct ReadOnlyDirs;

    impl DirOps for ReadOnlyDirs {
        fn create_dir(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }

        fn create_temp_dir(&self, _prefix: &str) -> io::Result<PathBuf> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    #[tokio::test]
    async fn test_output_dir_failure_skips_extraction() {
        let client = ArchiveClient::new(archive_with_file());
        let opts = InspectionOptions::for_image("busybox:latest");

        let mut meta = InspectorMetadata::new();
        let err = Inspector::new(opts)
            .with_client(client.clone())
            .with_dir_ops(Box::new(ReadOnlyDirs))
            .inspect(&mut meta)
            .await
            .unwrap_err();

        assert!(matches!(err, InspectorError::OutputDir { .. }));
        assert!(err.to_string().contains("read-only"));
        assert!(meta.acquired());
        assert!(meta.extracted_path.is_none());
        assert!(client.removed.lock().unwrap().is_empty());
    }
}
