use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, ResultExt};

/// Returns the absolute, canonical path of the running executable.
///
/// Symlinks are resolved, so for a binary launched through a link this is the
/// file the link points to.  The path is looked up again on every call.  On
/// Linux a binary whose directory entry was already removed resolves to a
/// path with a ` (deleted)` suffix that no longer exists, so this fails.
pub fn resolve_self_path() -> Result<PathBuf, Error> {
    let exe = env::current_exe().kind(
        ErrorKind::PathResolutionFailed,
        "could not determine the running executable",
    )?;
    let canonical = exe.canonicalize().map_err(|err| {
        Error::io(
            ErrorKind::PathResolutionFailed,
            "could not canonicalize the running executable",
            err,
        )
        .with_path(&exe)
    })?;
    log::debug!("resolved running executable to {}", canonical.display());
    Ok(canonical)
}

/// Checks if two paths refer to the same file.
///
/// On Unix this compares device and inode numbers, elsewhere the canonical
/// paths are compared.
pub fn is_same_file<A: AsRef<Path>, B: AsRef<Path>>(a: A, b: B) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let a = fs::metadata(a)?;
        let b = fs::metadata(b)?;
        Ok(a.dev() == b.dev() && a.ino() == b.ino())
    }
    #[cfg(not(unix))]
    {
        Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
    }
}

/// Returns the directory holding `path`.
pub(crate) fn parent_dir(path: &Path) -> Result<&Path, Error> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent),
        _ => Err(
            Error::new(ErrorKind::PathResolutionFailed, "executable has no known parent folder")
                .with_path(path),
        ),
    }
}
