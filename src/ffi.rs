//! C ABI for the self operations.
//!
//! Every function returns `0` on success and the nonzero [`ErrorKind`] code
//! on failure.  The declarations live in `include/replace_exe.h`.
//!
//! [`ErrorKind`]: crate::ErrorKind
use std::cell::Cell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;

use crate::engine::Strategy;
use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastError {
    code: c_int,
    os_error: c_int,
}

const NO_ERROR: LastError = LastError {
    code: 0,
    os_error: 0,
};

thread_local! {
    static LAST_ERROR: Cell<LastError> = const { Cell::new(NO_ERROR) };
}

/// Records the outcome for the `re_last_*` accessors and flattens it.
fn report<T>(result: Result<T, Error>) -> c_int {
    let last = match result {
        Ok(_) => NO_ERROR,
        Err(err) => {
            log::debug!("self operation failed: {}", err);
            LastError {
                code: err.kind().code(),
                os_error: err.raw_os_error().unwrap_or(0),
            }
        }
    };
    LAST_ERROR.with(|cell| cell.set(last));
    last.code
}

/// Copies the caller's string, the caller keeps ownership of the buffer.
unsafe fn path_from_c(ptr: *const c_char) -> Result<PathBuf, Error> {
    if ptr.is_null() {
        return Err(Error::new(ErrorKind::SourceMissing, "replacement path is null"));
    }
    let bytes = CStr::from_ptr(ptr).to_bytes();
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }
    #[cfg(not(unix))]
    {
        std::str::from_utf8(bytes).map(PathBuf::from).map_err(|_| {
            Error::new(
                ErrorKind::SourceMissing,
                "replacement path is not valid UTF-8",
            )
        })
    }
}

/// Selects the platform strategy.  Optional and idempotent, the other
/// functions do this on first use.
#[no_mangle]
pub extern "C" fn re_init() -> c_int {
    report(Strategy::current())
}

/// Deletes the running executable, see [`self_delete`](crate::self_delete).
#[no_mangle]
pub extern "C" fn re_self_delete() -> c_int {
    report(crate::self_delete())
}

/// Replaces the running executable with the file at `new_exe_path`, see
/// [`self_replace`](crate::self_replace).
///
/// # Safety
///
/// `new_exe_path` must be null or point to a NUL-terminated string that stays
/// valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn re_self_replace(new_exe_path: *const c_char) -> c_int {
    report(path_from_c(new_exe_path).and_then(crate::self_replace))
}

/// The error code of the last call on this thread, `0` if it succeeded.
#[no_mangle]
pub extern "C" fn re_last_error() -> c_int {
    LAST_ERROR.with(|cell| cell.get().code)
}

/// The OS error (`errno` or `GetLastError`) behind the last failure on this
/// thread, `0` if there was none.
#[no_mangle]
pub extern "C" fn re_last_os_error() -> c_int {
    LAST_ERROR.with(|cell| cell.get().os_error)
}
