//! Image Inspector Core - Shared Types
//!
//! Options, errors, container engine descriptors and the per-run metadata
//! record used across the image inspector crates.

pub mod config;
pub mod error;
pub mod metadata;
pub mod types;

// Re-export commonly used types
pub use config::{InspectionOptions, PullPolicy, DEFAULT_DOCKER_URI, DEFAULT_TEMP_PREFIX};
pub use error::{InspectorError, Result};
pub use metadata::InspectorMetadata;
pub use types::{Change, ChangeKind, ContainerDescriptor, ContainerState, ImageDescriptor};

/// Image inspector version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
