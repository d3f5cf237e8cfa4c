use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// The closed set of ways a self operation can fail.
///
/// Every kind has a stable, nonzero integer code which is what crosses the C
/// boundary.  `0` is reserved for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// The path of the running executable could not be determined.
    PathResolutionFailed = 1,
    /// The replacement image does not exist, is not a regular file or is the
    /// running executable itself.
    SourceMissing = 2,
    /// The OS refused access to the replacement image or the target directory.
    PermissionDenied = 3,
    /// Moving a file into or out of place failed.
    RenameFailed = 4,
    /// Removing (or scheduling the removal of) the executable failed.
    DeleteFailed = 5,
    /// This target has neither unlink-while-open nor locked-image semantics.
    UnsupportedPlatform = 6,
}

impl ErrorKind {
    /// Returns the integer code for this kind.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps an integer code back to a kind.  Returns `None` for `0` and for
    /// codes that are not known.
    pub fn from_code(code: i32) -> Option<ErrorKind> {
        Some(match code {
            1 => ErrorKind::PathResolutionFailed,
            2 => ErrorKind::SourceMissing,
            3 => ErrorKind::PermissionDenied,
            4 => ErrorKind::RenameFailed,
            5 => ErrorKind::DeleteFailed,
            6 => ErrorKind::UnsupportedPlatform,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PathResolutionFailed => "path resolution failed",
            ErrorKind::SourceMissing => "replacement source missing",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::RenameFailed => "rename failed",
            ErrorKind::DeleteFailed => "delete failed",
            ErrorKind::UnsupportedPlatform => "unsupported platform",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned by all operations of this crate.
///
/// Besides the [`ErrorKind`] it keeps what was being done, the path involved
/// and the underlying OS error if there was one.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {context}{}", DisplayPath(.path.as_deref()))]
pub struct Error {
    kind: ErrorKind,
    context: &'static str,
    path: Option<PathBuf>,
    #[source]
    source: Option<io::Error>,
}

struct DisplayPath<'a>(Option<&'a Path>);

impl fmt::Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(path) => write!(f, " ({})", path.display()),
            None => Ok(()),
        }
    }
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, context: &'static str) -> Error {
        Error {
            kind,
            context,
            path: None,
            source: None,
        }
    }

    pub(crate) fn io(kind: ErrorKind, context: &'static str, source: io::Error) -> Error {
        Error {
            kind,
            context,
            path: None,
            source: Some(source),
        }
    }

    pub(crate) fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Error {
        self.path = Some(path.into());
        self
    }

    /// The failure kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The path the failing step was operating on, if known.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The raw OS error code (`errno` or `GetLastError`) if the failure came
    /// from the operating system.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(|err| err.raw_os_error())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match err.source {
            Some(ref source) => source.kind(),
            None => match err.kind {
                ErrorKind::SourceMissing => io::ErrorKind::NotFound,
                ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
                ErrorKind::UnsupportedPlatform => io::ErrorKind::Unsupported,
                _ => io::ErrorKind::Other,
            },
        };
        io::Error::new(kind, err)
    }
}

/// Helper for attaching a kind and context to `io::Result`s.
pub(crate) trait ResultExt<T> {
    fn kind(self, kind: ErrorKind, context: &'static str) -> Result<T, Error>;
}

impl<T> ResultExt<T> for io::Result<T> {
    fn kind(self, kind: ErrorKind, context: &'static str) -> Result<T, Error> {
        self.map_err(|err| Error::io(kind, context, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_codes_are_stable() {
        let all = [
            ErrorKind::PathResolutionFailed,
            ErrorKind::SourceMissing,
            ErrorKind::PermissionDenied,
            ErrorKind::RenameFailed,
            ErrorKind::DeleteFailed,
            ErrorKind::UnsupportedPlatform,
        ];
        for (idx, kind) in all.iter().enumerate() {
            assert_eq!(kind.code(), idx as i32 + 1);
            assert_eq!(ErrorKind::from_code(kind.code()), Some(*kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(-1), None);
        assert_eq!(ErrorKind::from_code(7), None);
    }

    #[test]
    fn test_display_includes_path() {
        let err = Error::new(ErrorKind::SourceMissing, "not a regular file")
            .with_path("/nonexistent/file");
        assert_eq!(
            err.to_string(),
            "replacement source missing: not a regular file (/nonexistent/file)"
        );
        let err = Error::new(ErrorKind::UnsupportedPlatform, "no strategy for this target");
        assert_eq!(
            err.to_string(),
            "unsupported platform: no strategy for this target"
        );
    }

    #[test]
    fn test_source_and_os_error() {
        let err = Error::io(
            ErrorKind::DeleteFailed,
            "could not unlink executable",
            io::Error::from_raw_os_error(2),
        );
        assert_eq!(err.raw_os_error(), Some(2));
        assert!(err.source().is_some());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_into_io_error_without_source() {
        let io_err: io::Error = Error::new(ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
        let inner = io_err.into_inner().unwrap();
        let err = inner.downcast::<Error>().unwrap();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}
