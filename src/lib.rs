//! `replace-exe` lets a running executable delete its own file or swap it for
//! another executable while it keeps running.  On Unix this is mostly a matter
//! of using `unlink` and `rename` correctly, on Windows a running image is
//! locked and needs a detour.
//!
//! The same operations are exported with a C ABI (see [`ffi`]) so that
//! programs written in other languages can link the `cdylib` or `staticlib`
//! build of this crate.
//!
//! ## Self Deletion
//!
//! [`self_delete`] removes the running executable.  On Unix the file system
//! entry is gone when the call returns ([`Removal::Removed`]), on Windows the
//! file is deleted after the process shut down ([`Removal::Scheduled`]).  Do not
//! follow a deletion up with a replacement, use [`self_replace`] for that as on
//! Windows the file is still locked.
//!
//! ```
//! # fn foo() -> Result<(), replace_exe::Error> {
//! let removal = replace_exe::self_delete()?;
//! if removal.is_scheduled() {
//!     println!("executable is removed once we exit");
//! }
//! # Ok(()) }
//! ```
//!
//! ## Self Replacing
//!
//! [`self_replace`] puts a copy of another executable at the path of the running
//! one.  The source is left alone, once the function succeeded it can be
//! deleted.
//!
//! ```
//! use std::fs;
//!
//! # fn foo() -> Result<(), std::io::Error> {
//! let new_binary = "/path/to/new/binary";
//! replace_exe::self_replace(&new_binary)?;
//! fs::remove_file(&new_binary)?;
//! # Ok(()) }
//! ```
//!
//! ## Errors
//!
//! All operations fail with an [`Error`] whose [`ErrorKind`] is one of a small
//! closed set.  Each kind has a stable integer code which is what the C ABI
//! returns.  Failed calls are never retried and no other strategy is tried
//! once the file system was touched.  `Error` converts into `std::io::Error`.
//!
//! ## Implementation
//!
//! The path of the running executable is resolved fresh on every call and
//! canonicalized, so a binary started through a symlink operates on the
//! file the link points to.
//!
//! On Unix a running executable can be unlinked, the process keeps running off
//! the now detached inode.  For replacing, the new executable is written to a
//! temporary file right next to the current one and moved over it with a
//! single `rename`.  Other readers of the path see either the old or the new
//! file, never a partial one.
//!
//! On Windows a running executable can be renamed but not deleted or written.
//! For replacing, the executable is first moved aside within its directory,
//! the new one is staged next to it and renamed into place, and the moved
//! executable is scheduled for deletion.  If the new one cannot be put in
//! place, the old one is moved back.  Deletion is scheduled by copying the
//! executable, opening the copy with `FILE_FLAG_DELETE_ON_CLOSE` and spawning
//! it.  Code that runs before `main` in every binary linking this crate detects
//! that it runs as such a copy, waits for the parent to exit, deletes the
//! original and exits.  No elevated privileges and no reboot are needed.
//!
//! Concurrent replacements of the same executable from several processes are
//! not coordinated, the last rename wins.
use std::path::Path;

mod engine;
mod error;
pub mod ffi;
mod resolve;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use crate::engine::{Removal, ReplaceOptions};
pub use crate::error::{Error, ErrorKind};
pub use crate::resolve::{is_same_file, resolve_self_path};

use crate::engine::Source;

/// Deletes the running executable in a platform independent manner.
///
/// On Windows the deletion is delayed until the process shuts down and this
/// can only be done once per process.  For updating instead of deleting, use
/// [`self_replace`].
///
/// Calling this again after the executable was removed fails.
///
/// ```
/// # fn foo() -> Result<(), replace_exe::Error> {
/// replace_exe::self_delete()?;
/// # Ok(()) }
/// ```
pub fn self_delete() -> Result<Removal, Error> {
    engine::delete(None, None)
}

/// Like [`self_delete`] but for an executable that is no longer at the path
/// it was started from, for instance because the program renamed itself.
///
/// `exe` must be the running executable, on Windows it is used to bootstrap
/// the deletion.
pub fn self_delete_at<P: AsRef<Path>>(exe: P) -> Result<Removal, Error> {
    engine::delete(Some(exe.as_ref()), None)
}

/// Like [`self_delete`] but makes sure no temporary files are left inside
/// `protected_path`, so that the folder can be removed afterwards.
///
/// On Unix this is the same as [`self_delete`].
pub fn self_delete_outside_path<P: AsRef<Path>>(protected_path: P) -> Result<Removal, Error> {
    engine::delete(None, Some(protected_path.as_ref()))
}

/// Replaces the running executable with a different one.
///
/// The provided path is copied over and once the function succeeded the source
/// can be deleted.  It has to be an existing, readable regular file other than
/// the running executable, otherwise nothing is touched and the call fails
/// with [`ErrorKind::SourceMissing`].
///
/// ```
/// use std::fs;
///
/// # fn foo() -> Result<(), std::io::Error> {
/// let new_binary = "/path/to/new/binary";
/// replace_exe::self_replace(&new_binary)?;
/// fs::remove_file(&new_binary)?;
/// # Ok(()) }
/// ```
///
/// When this returns, the new executable is already at the old location.  The
/// permissions of the original file are restored on it, see
/// [`self_replace_with_options`] to change that.
pub fn self_replace<P: AsRef<Path>>(new_executable: P) -> Result<(), Error> {
    self_replace_with_options(new_executable, &ReplaceOptions::default())
}

/// Replaces the running executable with the given in-memory image.
///
/// The image receives the permissions of the running executable.
pub fn self_replace_with(new_executable_content: &[u8]) -> Result<(), Error> {
    engine::replace(
        Source::Bytes(new_executable_content),
        &ReplaceOptions::default(),
    )
}

/// [`self_replace`] with explicit [`ReplaceOptions`].
///
/// ```
/// # fn foo() -> Result<(), replace_exe::Error> {
/// let mut options = replace_exe::ReplaceOptions::new();
/// options.consume_source(true);
/// replace_exe::self_replace_with_options("/path/to/new/binary", &options)?;
/// # Ok(()) }
/// ```
pub fn self_replace_with_options<P: AsRef<Path>>(
    new_executable: P,
    options: &ReplaceOptions,
) -> Result<(), Error> {
    engine::replace(Source::Path(new_executable.as_ref()), options)
}
