use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, ErrorKind};
use crate::resolve::{is_same_file, resolve_self_path};

/// What a successful delete actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Removal {
    /// The directory entry is gone by the time the call returns.
    Removed,
    /// The removal is registered and happens once the process has shut down.
    Scheduled,
}

impl Removal {
    /// Returns `true` if the file still exists and is only scheduled for
    /// removal.
    pub fn is_scheduled(self) -> bool {
        self == Removal::Scheduled
    }
}

/// Controls how [`self_replace_with_options`](crate::self_replace_with_options)
/// installs the new executable.
///
/// ```
/// let mut options = replace_exe::ReplaceOptions::new();
/// options.preserve_permissions(false).consume_source(true);
/// ```
#[derive(Debug, Clone)]
pub struct ReplaceOptions {
    pub(crate) preserve_permissions: bool,
    pub(crate) consume_source: bool,
}

impl Default for ReplaceOptions {
    fn default() -> ReplaceOptions {
        ReplaceOptions {
            preserve_permissions: true,
            consume_source: false,
        }
    }
}

impl ReplaceOptions {
    /// Creates the default options: copy the source, restore permissions.
    pub fn new() -> ReplaceOptions {
        ReplaceOptions::default()
    }

    /// Apply the permissions of the executable being replaced to the new one.
    ///
    /// When turned off the new executable keeps its own permissions.  In-memory
    /// images always receive the permissions of the replaced executable.
    pub fn preserve_permissions(&mut self, yes: bool) -> &mut ReplaceOptions {
        self.preserve_permissions = yes;
        self
    }

    /// Move the source into place instead of copying it.
    ///
    /// On Unix this is a single rename if source and executable live on the
    /// same file system, otherwise the source is copied next to the executable,
    /// renamed into place and then removed.  On Windows the source is always
    /// staged as a copy first and removed once the replacement succeeded.
    pub fn consume_source(&mut self, yes: bool) -> &mut ReplaceOptions {
        self.consume_source = yes;
        self
    }
}

/// The new executable image.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Source<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

/// The two families of semantics for an executable that is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// A running image can be unlinked and renamed over.
    #[cfg(unix)]
    Posix,
    /// A running image can be renamed but neither deleted nor overwritten.
    #[cfg(windows)]
    Windows,
}

impl Strategy {
    fn for_target() -> Option<Strategy> {
        #[cfg(unix)]
        {
            Some(Strategy::Posix)
        }
        #[cfg(windows)]
        {
            Some(Strategy::Windows)
        }
        #[cfg(not(any(unix, windows)))]
        {
            None
        }
    }

    /// Returns the strategy of this target.
    ///
    /// The selection happens once per process, on first use.
    pub(crate) fn current() -> Result<Strategy, Error> {
        static SELECTED: OnceLock<Option<Strategy>> = OnceLock::new();
        let selected = *SELECTED.get_or_init(|| {
            let strategy = Strategy::for_target();
            match strategy {
                Some(strategy) => log::debug!("self operations use the {:?} strategy", strategy),
                None => log::debug!("no self operation strategy for this target"),
            }
            strategy
        });
        selected.ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedPlatform,
                "no self operation strategy for this target",
            )
        })
    }

    /// `protected_path` only matters on Windows, on Unix nothing is left
    /// behind that could end up in it.
    #[cfg_attr(not(windows), allow(unused_variables))]
    fn delete(self, exe: &Path, protected_path: Option<&Path>) -> Result<Removal, Error> {
        match self {
            #[cfg(unix)]
            Strategy::Posix => crate::unix::delete(exe),
            #[cfg(windows)]
            Strategy::Windows => crate::windows::delete(exe, protected_path),
        }
    }

    fn replace(self, exe: &Path, source: Source<'_>, options: &ReplaceOptions) -> Result<(), Error> {
        match self {
            #[cfg(unix)]
            Strategy::Posix => crate::unix::replace(exe, source, options),
            #[cfg(windows)]
            Strategy::Windows => crate::windows::replace(exe, source, options),
        }
    }
}

/// Deletes the running executable.
///
/// `exe` overrides the resolved path for images the caller already renamed.
pub(crate) fn delete(
    exe: Option<&Path>,
    protected_path: Option<&Path>,
) -> Result<Removal, Error> {
    let exe = match exe {
        Some(exe) => exe.canonicalize().map_err(|err| {
            Error::io(
                ErrorKind::PathResolutionFailed,
                "could not canonicalize executable",
                err,
            )
            .with_path(exe)
        })?,
        None => resolve_self_path()?,
    };
    let strategy = Strategy::current()?;
    log::debug!("deleting {}", exe.display());
    let removal = strategy.delete(&exe, protected_path)?;
    log::debug!("{} is {:?}", exe.display(), removal);
    Ok(removal)
}

/// Replaces the running executable with `source`.
pub(crate) fn replace(source: Source<'_>, options: &ReplaceOptions) -> Result<(), Error> {
    let exe = resolve_self_path()?;
    validate_source(&exe, source)?;
    let strategy = Strategy::current()?;
    log::debug!("replacing {}", exe.display());
    strategy.replace(&exe, source, options)?;
    log::debug!("replaced {}", exe.display());
    Ok(())
}

fn source_error(err: io::Error, context: &'static str, path: &Path) -> Error {
    let kind = if err.kind() == io::ErrorKind::PermissionDenied {
        ErrorKind::PermissionDenied
    } else {
        ErrorKind::SourceMissing
    };
    Error::io(kind, context, err).with_path(path)
}

/// Checks the replacement before anything on disk is touched.
pub(crate) fn validate_source(exe: &Path, source: Source<'_>) -> Result<(), Error> {
    let path = match source {
        Source::Path(path) => path,
        Source::Bytes(bytes) => {
            if bytes.is_empty() {
                return Err(Error::new(
                    ErrorKind::SourceMissing,
                    "replacement image is empty",
                ));
            }
            return Ok(());
        }
    };

    let metadata = fs::metadata(path)
        .map_err(|err| source_error(err, "replacement executable does not exist", path))?;
    if !metadata.is_file() {
        return Err(
            Error::new(ErrorKind::SourceMissing, "replacement is not a regular file")
                .with_path(path),
        );
    }
    fs::File::open(path)
        .map_err(|err| source_error(err, "replacement executable is not readable", path))?;
    if is_same_file(exe, path)
        .map_err(|err| source_error(err, "could not compare replacement to executable", path))?
    {
        return Err(Error::new(
            ErrorKind::SourceMissing,
            "replacement is the running executable itself",
        )
        .with_path(path));
    }
    Ok(())
}
