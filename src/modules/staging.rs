//! Atomic copies into and out of the mirror directory.
//!
//! Bytes are streamed into a temporary file next to the destination and
//! renamed over it only once fully written and synced. A failure at any
//! point before the rename drops the temporary file, so the destination is
//! either its previous contents or absent.

use std::fs::{self, File, Permissions};
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

const STAGING_PREFIX: &str = ".staging-";

#[cfg(unix)]
fn default_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<Permissions> {
    None
}

/// Copy `src` to `dst` atomically, carrying over the source's mode.
pub fn stage_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = File::open(src)?;
    let permissions = reader.metadata().map(|m| m.permissions()).ok();
    stage_from_reader(&mut reader, permissions, dst)?;
    debug!(src = %src.display(), dst = %dst.display(), "Staged module file");
    Ok(())
}

/// Write everything `reader` yields to `dst` atomically.
///
/// `permissions` falls back to 0644 on unix when absent.
pub fn stage_from_reader(
    reader: &mut impl Read,
    permissions: Option<Permissions>,
    dst: &Path,
) -> io::Result<()> {
    let dir = dst
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)?;
    io::copy(reader, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions.or_else(default_permissions) {
        tmp.as_file().set_permissions(permissions)?;
    }
    tmp.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

/// Remove a staged file. Already absent counts as success.
pub fn unstage_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Unstaged module file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
