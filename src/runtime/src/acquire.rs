//! Image acquisition.
//!
//! Decides, per pull policy, whether an image must be pulled, runs the pull
//! with the progress decoder attached, or reads a running container instead.
//! Every failure is also recorded as text in the run's metadata.

use image_inspector_core::config::{InspectionOptions, PullPolicy};
use image_inspector_core::error::{InspectorError, Result};
use image_inspector_core::metadata::InspectorMetadata;
use image_inspector_core::types::{Change, ContainerDescriptor, ImageDescriptor};

use crate::auth::{resolve_credentials, CredentialEntry, CredentialSet};
use crate::client::{parse_repository_tag, PullImageOptions, RuntimeClient};
use crate::stream::StreamDecoder;

/// Buffer between the pull call and the progress decoder.
const PROGRESS_PIPE_SIZE: usize = 64 * 1024;

/// Acquisition progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireState {
    Idle,
    ResolvingCredentials,
    Inspecting,
    Pulling,
    ReadingContainer,
    Done,
}

/// What was acquired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionResult {
    /// Image reference or container id used for the rest of the run.
    pub reference: String,
    pub image: Option<ImageDescriptor>,
    pub container: Option<ContainerDescriptor>,
    /// Filesystem changes of the container, when requested.
    pub changes: Vec<Change>,
}

/// Acquires the image or container named by the options.
pub struct ImageAcquirer<'a> {
    opts: &'a InspectionOptions,
    client: &'a dyn RuntimeClient,
    state: AcquireState,
}

impl<'a> ImageAcquirer<'a> {
    pub fn new(opts: &'a InspectionOptions, client: &'a dyn RuntimeClient) -> Self {
        Self {
            opts,
            client,
            state: AcquireState::Idle,
        }
    }

    pub fn state(&self) -> AcquireState {
        self.state
    }

    /// Run acquisition, recording the outcome in `meta`.
    ///
    /// On failure `meta.image_acquire_error` holds the error text; on
    /// success it is left empty and the acquired descriptors are stored.
    pub async fn acquire(&mut self, meta: &mut InspectorMetadata) -> Result<AcquisitionResult> {
        let result = self.run().await;
        match &result {
            Ok(acquired) => {
                meta.image_acquire_error.clear();
                meta.image = acquired.image.clone();
                meta.container = acquired.container.clone();
                meta.container_changes = acquired.changes.clone();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Image acquisition failed");
                meta.image_acquire_error = e.to_string();
            }
        }
        self.transition(AcquireState::Done);
        result
    }

    async fn run(&mut self) -> Result<AcquisitionResult> {
        self.transition(AcquireState::ResolvingCredentials);
        let credentials = resolve_credentials(self.opts)?;

        if self.opts.is_container_mode() {
            return self.read_container().await;
        }

        self.transition(AcquireState::Inspecting);
        let opts = self.opts;
        let image = &opts.image;
        // Any inspect failure counts as "not present"; the pull policy decides.
        let present = match self.client.inspect_image(image).await {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                tracing::debug!(image = %image, error = %e, "Image not available locally");
                None
            }
        };

        let pull = match opts.pull_policy {
            PullPolicy::Never if present.is_none() => {
                return Err(InspectorError::PullForbidden {
                    image: image.clone(),
                    policy: opts.pull_policy.to_string(),
                });
            }
            PullPolicy::Never => false,
            PullPolicy::Always => true,
            PullPolicy::IfNotPresent => present.is_none(),
        };

        let descriptor = if pull {
            self.pull_image(&credentials).await?;
            // The pulled image is usable even if it cannot be described.
            match self.client.inspect_image(image).await {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    tracing::debug!(image = %image, error = %e, "Unable to inspect pulled image");
                    present
                }
            }
        } else {
            tracing::info!(image = %image, "Using locally available image");
            present
        };

        Ok(AcquisitionResult {
            reference: image.clone(),
            image: descriptor,
            container: None,
            changes: Vec::new(),
        })
    }

    async fn read_container(&mut self) -> Result<AcquisitionResult> {
        self.transition(AcquireState::ReadingContainer);
        let id = &self.opts.container;

        let container = self
            .client
            .inspect_container(id)
            .await
            .map_err(|e| InspectorError::ContainerInspect(e.to_string()))?;

        let changes = if self.opts.scan_container_changes {
            let changes = self
                .client
                .container_changes(id)
                .await
                .map_err(|e| InspectorError::ContainerChanges(e.to_string()))?;
            tracing::info!(container = %id, changes = changes.len(), "Collected container changes");
            changes
        } else {
            Vec::new()
        };

        let reference = if container.id.is_empty() {
            id.clone()
        } else {
            container.id.clone()
        };

        Ok(AcquisitionResult {
            reference,
            image: None,
            container: Some(container),
            changes,
        })
    }

    /// Pull the configured image, trying each credential in order.
    ///
    /// An empty set falls back to an anonymous pull. The error of the last
    /// attempt is reported when every attempt fails.
    pub async fn pull_image(&mut self, credentials: &CredentialSet) -> Result<()> {
        self.transition(AcquireState::Pulling);

        let anonymous = CredentialSet::anonymous();
        let credentials = if credentials.is_empty() {
            &anonymous
        } else {
            credentials
        };

        let (repository, tag) = parse_repository_tag(&self.opts.image);
        let mut last_error = None;
        for auth in credentials {
            match pull_once(self.client, repository, tag, auth).await {
                Ok(()) => {
                    tracing::info!(image = %self.opts.image, "Pulled image");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        image = %self.opts.image,
                        registry = %auth.registry,
                        error = %e,
                        "Pull attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(InspectorError::PullFailed(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    fn transition(&mut self, next: AcquireState) {
        tracing::debug!(from = ?self.state, to = ?next, "Acquisition state change");
        self.state = next;
    }
}

/// One pull call with the progress decoder running alongside it.
async fn pull_once(
    client: &dyn RuntimeClient,
    repository: &str,
    tag: Option<&str>,
    auth: &CredentialEntry,
) -> Result<()> {
    let (writer, reader) = tokio::io::duplex(PROGRESS_PIPE_SIZE);
    let decoder = StreamDecoder::spawn(reader);

    let options = PullImageOptions {
        repository: repository.to_string(),
        tag: tag.map(str::to_string),
        output: writer,
    };
    let pulled = client.pull_image(options, auth).await;

    // The writer is gone once the call returns, so the decoder always ends.
    let decoded = decoder.wait().await;
    pulled?;
    decoded
}
