use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{InspectorError, Result};

/// Default engine endpoint.
pub const DEFAULT_DOCKER_URI: &str = "unix:///var/run/docker.sock";

/// Default prefix for generated destination directories.
pub const DEFAULT_TEMP_PREFIX: &str = "image-inspector-";

/// Whether an image may be fetched from a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Only use an image that is already present locally
    Never,
    /// Pull on every inspection
    Always,
    /// Pull only when the image is missing locally
    IfNotPresent,
}

impl Default for PullPolicy {
    fn default() -> Self {
        Self::IfNotPresent
    }
}

impl std::fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Always => write!(f, "always"),
            Self::IfNotPresent => write!(f, "if-not-present"),
        }
    }
}

impl std::str::FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "if-not-present" => Ok(Self::IfNotPresent),
            _ => Err(format!(
                "unknown pull policy: '{}' (supported: never, always, if-not-present)",
                s
            )),
        }
    }
}

/// Options for a single inspection run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionOptions {
    /// Engine endpoint (`unix://` or `tcp://`)
    pub docker_uri: String,

    /// Image reference to inspect
    pub image: String,

    /// Running container to inspect instead of an image
    pub container: String,

    /// Also collect filesystem changes of the running container
    pub scan_container_changes: bool,

    /// Pull policy for the image
    pub pull_policy: PullPolicy,

    /// Registry username, paired with `password_file`
    pub username: String,

    /// File holding the registry password
    pub password_file: Option<PathBuf>,

    /// Engine credential files, consulted in order
    pub docker_cfg: Vec<PathBuf>,

    /// Destination directory; a temporary directory is generated when unset
    pub dst_path: Option<PathBuf>,

    /// Prefix for generated destination directories
    pub temp_prefix: String,
}

impl Default for InspectionOptions {
    fn default() -> Self {
        Self {
            docker_uri: DEFAULT_DOCKER_URI.to_string(),
            image: String::new(),
            container: String::new(),
            scan_container_changes: false,
            pull_policy: PullPolicy::default(),
            username: String::new(),
            password_file: None,
            docker_cfg: Vec::new(),
            dst_path: None,
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
        }
    }
}

impl InspectionOptions {
    /// Options for inspecting an image.
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Options for inspecting a running container.
    pub fn for_container(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            ..Default::default()
        }
    }

    /// Whether this run reads a running container rather than an image.
    pub fn is_container_mode(&self) -> bool {
        !self.container.is_empty()
    }

    /// Check option combinations before any work is done.
    pub fn validate(&self) -> Result<()> {
        if self.docker_uri.is_empty() {
            return Err(InspectorError::ConfigError(
                "docker socket connection must be specified".to_string(),
            ));
        }
        if self.image.is_empty() && self.container.is_empty() {
            return Err(InspectorError::ConfigError(
                "docker image or container must be specified to inspect".to_string(),
            ));
        }
        if !self.image.is_empty() && !self.container.is_empty() {
            return Err(InspectorError::ConfigError(
                "options container and image are mutually exclusive".to_string(),
            ));
        }
        if self.username.is_empty() != self.password_file.is_none() {
            return Err(InspectorError::ConfigError(
                "username and password-file must be specified together".to_string(),
            ));
        }
        if self.scan_container_changes && self.container.is_empty() {
            return Err(InspectorError::ConfigError(
                "scan-container-changes requires a container to inspect".to_string(),
            ));
        }
        Ok(())
    }
}
