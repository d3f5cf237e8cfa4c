use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::engine::{Removal, ReplaceOptions, Source};
use crate::error::{Error, ErrorKind, ResultExt};
use crate::resolve::parent_dir;

/// Cross-device link.  18 on Linux, macOS, FreeBSD, NetBSD and OpenBSD.
const EXDEV: i32 = 18;

/// Creates an empty temporary file right next to `exe` so that the final
/// rename stays on the same file system.
fn stage_next_to(exe: &Path) -> Result<NamedTempFile, Error> {
    let prefix = match exe.file_stem().and_then(|x| x.to_str()) {
        Some(hint) => format!(".{}.__temp__", hint),
        None => ".__temp__".into(),
    };
    let dir = parent_dir(exe)?;
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(dir)
        .map_err(|err| {
            let kind = if err.kind() == io::ErrorKind::PermissionDenied {
                ErrorKind::PermissionDenied
            } else {
                ErrorKind::RenameFailed
            };
            Error::io(kind, "could not create temporary file next to executable", err)
                .with_path(dir)
        })
}

fn fill_staged(
    staged: &mut NamedTempFile,
    source: Source<'_>,
    permissions: &fs::Permissions,
    options: &ReplaceOptions,
) -> io::Result<()> {
    match source {
        Source::Path(path) => {
            fs::copy(path, staged.path())?;
            if options.preserve_permissions {
                fs::set_permissions(staged.path(), permissions.clone())?;
            }
        }
        Source::Bytes(bytes) => {
            staged.as_file_mut().write_all(bytes)?;
            staged.as_file_mut().flush()?;
            fs::set_permissions(staged.path(), permissions.clone())?;
        }
    }
    staged.as_file().sync_all()
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).map_or(false, |x| x.file_type().is_symlink())
}

/// Renames `source` straight onto `exe`.  If the rename fails the source
/// gets its own permissions back.
fn move_into_place(
    exe: &Path,
    source: &Path,
    permissions: &fs::Permissions,
    options: &ReplaceOptions,
) -> io::Result<()> {
    let source_permissions = fs::metadata(source)?.permissions();
    if options.preserve_permissions {
        fs::set_permissions(source, permissions.clone())?;
    }
    fs::rename(source, exe).map_err(|err| {
        if options.preserve_permissions {
            if let Err(restore_err) = fs::set_permissions(source, source_permissions) {
                log::warn!(
                    "could not restore permissions of {}: {}",
                    source.display(),
                    restore_err
                );
            }
        }
        err
    })
}

/// On Unix a running executable can be unlinked, the process keeps running
/// off the detached inode.
pub(crate) fn delete(exe: &Path) -> Result<Removal, Error> {
    fs::remove_file(exe).map_err(|err| {
        Error::io(ErrorKind::DeleteFailed, "could not unlink executable", err).with_path(exe)
    })?;
    Ok(Removal::Removed)
}

/// Swaps the file at `exe` for the new image.
///
/// The only mutation of `exe` is the final `rename`, so anyone opening `exe`
/// sees either the old or the new file in full.
pub(crate) fn replace(
    exe: &Path,
    source: Source<'_>,
    options: &ReplaceOptions,
) -> Result<(), Error> {
    let permissions = fs::metadata(exe)
        .kind(
            ErrorKind::PathResolutionFailed,
            "could not read metadata of executable",
        )?
        .permissions();

    // renaming a symlink would put the link itself at `exe`
    let rename_source = match source {
        Source::Path(path) if options.consume_source => {
            let linked = is_symlink(path);
            if linked {
                log::debug!("{} is a symlink, copying its target", path.display());
            }
            !linked
        }
        _ => false,
    };

    if let (Source::Path(path), true) = (source, rename_source) {
        match move_into_place(exe, path, &permissions, options) {
            Ok(()) => {
                log::debug!("renamed {} into place", path.display());
                return Ok(());
            }
            Err(err) if err.raw_os_error() == Some(EXDEV) => {
                log::debug!(
                    "{} is on another file system, copying it next to the executable",
                    path.display()
                );
            }
            Err(err) => {
                return Err(
                    Error::io(ErrorKind::RenameFailed, "could not move replacement into place", err)
                        .with_path(path),
                );
            }
        }
    }

    let mut staged = stage_next_to(exe)?;
    fill_staged(&mut staged, source, &permissions, options).map_err(|err| {
        Error::io(ErrorKind::RenameFailed, "could not write replacement next to executable", err)
            .with_path(staged.path())
    })?;

    // dropping the temporary file on failure removes it again
    staged.persist(exe).map_err(|err| {
        Error::io(ErrorKind::RenameFailed, "could not move replacement into place", err.error)
            .with_path(exe)
    })?;

    if let (Source::Path(path), true) = (source, options.consume_source) {
        if let Err(err) = fs::remove_file(path) {
            log::warn!("could not remove consumed source {}: {}", path.display(), err);
        }
    }
    Ok(())
}
