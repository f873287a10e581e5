//! Layer extraction utilities.
//!
//! Replays image layers (tar, optionally gzip-compressed) onto a directory,
//! honouring OCI whiteouts so that later layers shadow or delete content of
//! earlier ones. Entries are applied strictly in archive order.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, DirBuilder, File, FileTimes, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use image_inspector_core::error::{InspectorError, Result};
use tar::{Archive, EntryType};

/// Wrapper directory of engine filesystem archives; never materialized.
pub const ROOTFS_PREFIX: &str = "rootfs/";

/// Opaque whiteout marker: clears the containing directory.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Prefix marking a single whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Owner read+write, forced onto every extracted entry.
const OWNER_RW: u32 = 0o600;

/// Symlinks followed while resolving a single entry.
const MAX_SYMLINK_HOPS: usize = 40;

/// Extract an uncompressed layer tar stream into `destination`.
pub fn extract_layer_tar<R: Read>(src: R, destination: &Path) -> Result<()> {
    let mut archive = Archive::new(src);
    let mut applied = 0usize;
    let mut whiteouts = 0usize;

    for entry in archive.entries().map_err(tar_read)? {
        let mut entry = entry.map_err(tar_read)?;

        let name = entry.path().map_err(tar_read)?.into_owned();
        let link_name = entry
            .link_name()
            .map_err(tar_read)?
            .map(|l| l.into_owned());
        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = (header.mode().map_err(tar_read)? & 0o7777) | OWNER_RW;
        let modified = header.mtime().map(epoch_secs).unwrap_or(UNIX_EPOCH);
        let accessed = header
            .as_gnu()
            .and_then(|gnu| gnu.atime().ok())
            .filter(|secs| *secs > 0)
            .map(epoch_secs);

        let rel = relative_entry_path(&name)?;

        if let Some(file_name) = rel.file_name().and_then(|n| n.to_str()) {
            if file_name == OPAQUE_WHITEOUT {
                let marker = resolve_in_root(destination, &rel, &name)?;
                if let Some(dir) = marker.parent() {
                    clear_dir(dir)?;
                }
                whiteouts += 1;
                continue;
            }
            if let Some(shadowed) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                let shadowed =
                    resolve_in_root(destination, &rel.with_file_name(shadowed), &name)?;
                remove_path(&shadowed)?;
                whiteouts += 1;
                continue;
            }
        }

        // Symlinks planted by earlier entries are followed inside `destination` only.
        let dst = resolve_in_root(destination, &rel, &name)?;

        match entry_type {
            EntryType::Directory => {
                if fs::symlink_metadata(&dst).map(|m| !m.is_dir()).unwrap_or(false) {
                    fs::remove_file(&dst).map_err(|e| extract_err("replacing entry", &dst, e))?;
                }
                DirBuilder::new()
                    .recursive(true)
                    .mode(mode)
                    .create(&dst)
                    .map_err(|e| extract_err("creating directory", &dst, e))?;
                fs::set_permissions(&dst, Permissions::from_mode(mode))
                    .map_err(|e| extract_err("updating directory mode", &dst, e))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                ensure_parent(&dst)?;
                // A new file shadows the old path only; never write through
                // a symlink or into an inode shared with a hard link.
                if fs::symlink_metadata(&dst).map(|m| !m.is_dir()).unwrap_or(false) {
                    fs::remove_file(&dst).map_err(|e| extract_err("replacing entry", &dst, e))?;
                }
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(mode)
                    .open(&dst)
                    .map_err(|e| extract_err("creating file", &dst, e))?;
                io::copy(&mut entry, &mut file)
                    .map_err(|e| extract_err("writing into file", &dst, e))?;
                fs::set_permissions(&dst, Permissions::from_mode(mode))
                    .map_err(|e| extract_err("updating file mode", &dst, e))?;
            }
            EntryType::Symlink => {
                ensure_parent(&dst)?;
                let target = link_name.unwrap_or_default();
                match std::os::unix::fs::symlink(&target, &dst) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(extract_err("creating symlink", &dst, e)),
                }
                applied += 1;
                // Timestamps would be applied to the link target.
                continue;
            }
            EntryType::Link => {
                ensure_parent(&dst)?;
                let link_name = link_name.unwrap_or_default();
                let target =
                    resolve_in_root(destination, &relative_entry_path(&link_name)?, &link_name)?;
                match fs::hard_link(&target, &dst) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        if same_file(&target, &dst) {
                            applied += 1;
                            continue;
                        }
                        // An earlier layer left something else at this path.
                        remove_path(&dst)?;
                        fs::hard_link(&target, &dst)
                            .map_err(|e| extract_err("creating link", &dst, e))?;
                    }
                    Err(e) => return Err(extract_err("creating link", &dst, e)),
                }
            }
            other => {
                tracing::debug!(path = %rel.display(), entry_type = ?other, "Skipping unsupported layer entry");
                continue;
            }
        }

        restore_times(&dst, accessed.unwrap_or(modified), modified);
        applied += 1;
    }

    tracing::debug!(
        target = %destination.display(),
        entries = applied,
        whiteouts,
        "Extracted layer"
    );

    Ok(())
}

/// Extract a gzip-compressed layer stream into `destination`.
pub fn extract_gzip_layer<R: Read>(src: R, destination: &Path) -> Result<()> {
    extract_layer_tar(GzDecoder::new(src), destination)
}

/// Extract a single gzip-compressed layer file into `destination`.
pub fn untar_gz_layer(layer_path: &Path, destination: &Path) -> Result<()> {
    let file = File::open(layer_path).map_err(|e| extract_err("opening layer", layer_path, e))?;
    extract_gzip_layer(io::BufReader::new(file), destination)?;

    tracing::debug!(
        layer = %layer_path.display(),
        target = %destination.display(),
        "Extracted layer file"
    );

    Ok(())
}

/// Replay several gzip-compressed layer files, in order, onto one directory.
pub fn extract_layers<P: AsRef<Path>>(layers: &[P], destination: &Path) -> Result<()> {
    for (i, layer) in layers.iter().enumerate() {
        tracing::info!(
            layer = %layer.as_ref().display(),
            index = i + 1,
            total = layers.len(),
            "Applying layer"
        );
        untar_gz_layer(layer.as_ref(), destination)?;
    }
    Ok(())
}

/// Archive entry name relative to the destination, without the rootfs wrapper.
fn relative_entry_path(name: &Path) -> Result<PathBuf> {
    let stripped = name
        .strip_prefix(ROOTFS_PREFIX.trim_end_matches('/'))
        .unwrap_or(name);

    let mut rel = PathBuf::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(escape_err(name)),
        }
    }
    Ok(rel)
}

/// Resolve `rel` under `root` as if `root` were `/`.
///
/// Symlinks among the parent components are followed, absolute targets
/// restart at `root` and `..` never climbs above it. The final component is
/// not followed.
fn resolve_in_root(root: &Path, rel: &Path, name: &Path) -> Result<PathBuf> {
    let mut pending: VecDeque<OsString> = rel.iter().map(|part| part.to_os_string()).collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        if pending.is_empty() {
            resolved.push(part);
            break;
        }

        let candidate = root.join(&resolved).join(&part);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(escape_err(name));
                }
                let target = fs::read_link(&candidate)
                    .map_err(|e| extract_err("resolving entry", &candidate, e))?;
                if target.has_root() {
                    resolved.clear();
                }
                for component in target.components().rev() {
                    match component {
                        Component::Normal(p) => pending.push_front(p.to_os_string()),
                        Component::ParentDir => pending.push_front(OsString::from("..")),
                        Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                    }
                }
            }
            _ => resolved.push(part),
        }
    }

    Ok(root.join(resolved))
}

/// Remove everything inside `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(extract_err("clearing opaque directory", dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| extract_err("clearing opaque directory", dir, e))?;
        remove_path(&entry.path())?;
    }
    Ok(())
}

/// Remove a file, symlink or directory tree if present.
fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(extract_err("removing shadowed entry", path, e)),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::symlink_metadata(a), fs::symlink_metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| extract_err("creating directory", parent, e))?;
        }
    }
    Ok(())
}

/// Best effort; failures are ignored.
fn restore_times(path: &Path, accessed: SystemTime, modified: SystemTime) {
    let times = FileTimes::new().set_accessed(accessed).set_modified(modified);
    if let Ok(file) = File::open(path) {
        let _ = file.set_times(times);
    }
}

fn epoch_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn escape_err(name: &Path) -> InspectorError {
    extract_err(
        "resolving entry",
        name,
        io::Error::new(io::ErrorKind::InvalidInput, "path escapes the destination"),
    )
}

fn tar_read(e: io::Error) -> InspectorError {
    InspectorError::TarRead(e.to_string())
}

fn extract_err(action: &'static str, path: &Path, source: io::Error) -> InspectorError {
    InspectorError::Extract {
        action,
        path: path.to_path_buf(),
        source,
    }
}
