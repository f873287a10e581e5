//! Destination directory preparation.

use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use image_inspector_core::error::{InspectorError, Result};

/// Mode of directories created for extraction.
const OUTPUT_DIR_MODE: u32 = 0o755;

/// Filesystem operations used to prepare a destination directory.
pub trait DirOps: Send + Sync {
    /// Create a single directory.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Create a new uniquely-named temporary directory and return its path.
    fn create_temp_dir(&self, prefix: &str) -> io::Result<PathBuf>;
}

/// `DirOps` backed by the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsDirOps;

impl DirOps for OsDirOps {
    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::DirBuilder::new().mode(OUTPUT_DIR_MODE).create(path)
    }

    fn create_temp_dir(&self, prefix: &str) -> io::Result<PathBuf> {
        Ok(tempfile::Builder::new().prefix(prefix).tempdir()?.keep())
    }
}

/// Prepared destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDir {
    pub path: PathBuf,
    /// Whether the directory was generated and may be removed on failure.
    pub generated: bool,
}

/// Return a usable destination directory.
///
/// With no path a temporary directory named after `prefix` is generated.
/// An existing path is reused; any other creation failure is fatal.
pub fn create_output_dir(dir: Option<&Path>, prefix: &str, ops: &dyn DirOps) -> Result<OutputDir> {
    match dir.filter(|d| !d.as_os_str().is_empty()) {
        None => {
            let path = ops.create_temp_dir(prefix).map_err(|e| InspectorError::OutputDir {
                path: std::env::temp_dir().join(format!("{}*", prefix)),
                source: e,
            })?;
            tracing::debug!(path = %path.display(), "Created temporary output directory");
            Ok(OutputDir {
                path,
                generated: true,
            })
        }
        Some(dir) => match ops.create_dir(dir) {
            Ok(()) => Ok(OutputDir {
                path: dir.to_path_buf(),
                generated: false,
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %dir.display(), "Reusing existing output directory");
                Ok(OutputDir {
                    path: dir.to_path_buf(),
                    generated: false,
                })
            }
            Err(e) => Err(InspectorError::OutputDir {
                path: dir.to_path_buf(),
                source: e,
            }),
        },
    }
}
