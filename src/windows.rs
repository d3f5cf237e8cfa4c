use std::env;
use std::fs;
use std::io;
use std::mem;
use std::os::windows::prelude::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GENERIC_READ, HANDLE, INVALID_HANDLE_VALUE, MAX_PATH, WAIT_OBJECT_0,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, DeleteFileW, FILE_FLAG_DELETE_ON_CLOSE, FILE_SHARE_DELETE, FILE_SHARE_READ,
    OPEN_EXISTING, SYNCHRONIZE,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32First, Process32Next, PROCESSENTRY32, TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Environment::GetCommandLineW;
use windows_sys::Win32::System::LibraryLoader::GetModuleFileNameW;
use windows_sys::Win32::System::Memory::LocalFree;
use windows_sys::Win32::System::Threading::{
    CreateProcessA, ExitProcess, GetCurrentProcessId, OpenProcess, WaitForSingleObject,
    CREATE_NO_WINDOW, INFINITE, PROCESS_INFORMATION, STARTUPINFOA,
};
use windows_sys::Win32::UI::Shell::CommandLineToArgvW;

use crate::engine::{Removal, ReplaceOptions, Source};
use crate::error::{Error, ErrorKind};
use crate::resolve::parent_dir;

static HELPER_SUFFIX: &str = ".__selfdelete__.exe";
static RELOCATED_SUFFIX: &str = ".__relocated__.exe";
static STAGED_SUFFIX: &str = ".__temp__.exe";

/// Set once a deferred deletion of the running image was registered.
static DELETION_SCHEDULED: AtomicBool = AtomicBool::new(false);

/// Runs in "life before main" of every binary linking this crate.  `.CRT$XCV`
/// runs after the Rust runtime is set up.
#[used]
#[link_section = ".CRT$XCV"]
static DELETE_HELPER_HOOK: unsafe extern "C" fn() = run_as_delete_helper;

/// If this image is a delete helper (its file name ends in `HELPER_SUFFIX`),
/// wait for the parent to exit, delete the file named by the only argument and
/// exit.  Otherwise return and let the program start normally.
///
/// Only raw winapi calls are allowed here, nothing may allocate.  Paths longer
/// than `MAX_PATH` are not recognized as helpers.
unsafe extern "C" fn run_as_delete_helper() {
    let mut image = [0u16; MAX_PATH as _];
    let image_len = GetModuleFileNameW(0, image.as_mut_ptr(), MAX_PATH) as usize;
    if image_len == 0 || !ends_with_ascii(&image[..image_len], HELPER_SUFFIX) {
        return;
    }

    // From here on we never return into the program.  Failures cannot be
    // reported to anyone, so they only change the exit code.
    let mut argc = 0;
    let argv = CommandLineToArgvW(GetCommandLineW(), &mut argc);
    if argv.is_null() {
        ExitProcess(1);
    }
    if argc != 2 {
        LocalFree(argv as _);
        ExitProcess(1);
    }
    let target = *argv.add(1);
    let deleted = wait_for_parent_exit() && DeleteFileW(target) != 0;
    LocalFree(argv as _);

    if deleted {
        // The helper is open with DELETE_ON_CLOSE.  A short lived child that
        // inherits the handle outlives us, so the handle closes after our
        // image is unmapped and the helper file disappears as well.
        let mut pi: PROCESS_INFORMATION = mem::zeroed();
        let mut si: STARTUPINFOA = mem::zeroed();
        si.cb = mem::size_of::<STARTUPINFOA>() as _;
        let mut cmd = *b"ping 127.0.0.1 -n 1\0";
        CreateProcessA(
            ptr::null(),
            cmd.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            1,
            CREATE_NO_WINDOW,
            ptr::null(),
            ptr::null(),
            &si,
            &mut pi,
        );
    }

    ExitProcess(if deleted { 0 } else { 1 })
}

fn ends_with_ascii(wide: &[u16], suffix: &str) -> bool {
    wide.len() >= suffix.len()
        && wide[wide.len() - suffix.len()..]
            .iter()
            .zip(suffix.bytes())
            .all(|(&w, b)| w == b as u16)
}

/// Blocks until the parent process is gone.  Returns `false` if the parent
/// could not be determined.
///
/// Racy: the parent may exit and its id be reused between the snapshot and
/// `OpenProcess`.
fn wait_for_parent_exit() -> bool {
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
        if snapshot == INVALID_HANDLE_VALUE {
            return false;
        }

        let mut entry: PROCESSENTRY32 = mem::zeroed();
        entry.dwSize = mem::size_of::<PROCESSENTRY32>() as _;
        let me = GetCurrentProcessId();
        let mut found = Process32First(snapshot, &mut entry) != 0;
        while found && entry.th32ProcessID != me {
            found = Process32Next(snapshot, &mut entry) != 0;
        }
        CloseHandle(snapshot);
        if !found {
            return false;
        }

        let parent = OpenProcess(SYNCHRONIZE, 0, entry.th32ParentProcessID);
        if parent == 0 {
            // already gone
            return true;
        }
        let rv = WaitForSingleObject(parent, INFINITE);
        CloseHandle(parent);
        rv == WAIT_OBJECT_0
    }
}

/// Opens `path` with `FILE_FLAG_DELETE_ON_CLOSE` through an inheritable handle.
fn open_delete_on_close(path: &Path) -> io::Result<HANDLE> {
    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let sa = SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: 1,
    };
    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ,
            FILE_SHARE_READ | FILE_SHARE_DELETE,
            &sa,
            OPEN_EXISTING,
            FILE_FLAG_DELETE_ON_CLOSE,
            0,
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    Ok(handle)
}

/// Starts `helper` to delete `target` once we exited.  The helper inherits
/// its own delete-on-close handle, we keep ours open for a moment so the
/// child is up before we let go of it.
fn spawn_helper(helper: PathBuf, target: PathBuf) -> io::Result<()> {
    let handle = open_delete_on_close(&helper)?;
    let spawned = Command::new(&helper).arg(&target).spawn();
    if spawned.is_ok() {
        thread::sleep(Duration::from_millis(100));
    }
    unsafe {
        CloseHandle(handle);
    }
    spawned.map(|_| log::debug!("spawned {} to delete {}", helper.display(), target.display()))
}

/// A random, hidden file name in `dir` that still carries the executable's
/// name so it can be traced back.
fn random_sibling_name(dir: &Path, suffix: &str) -> PathBuf {
    let rng = fastrand::Rng::new();
    let mut file_name = String::from(".");
    if let Some(stem) = env::current_exe()
        .ok()
        .as_ref()
        .and_then(|x| x.file_stem())
        .and_then(|x| x.to_str())
    {
        file_name.push_str(stem);
        file_name.push('.');
    }
    file_name.extend((0..32).map(|_| rng.lowercase()));
    file_name.push_str(suffix);
    dir.join(file_name)
}

fn delete_failed(context: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |err| Error::io(ErrorKind::DeleteFailed, context, err).with_path(path)
}

/// Registers the removal of `exe` for after shutdown.
///
/// `exe` has to be a copy of this crate's code since it is also used as the
/// helper.  Preferably it is moved to the temp dir first, then nothing is
/// left next to it.  With a `protected_path` neither the helper nor `exe`
/// stay in there.
fn schedule_deletion(exe: &Path, protected_path: Option<&Path>) -> Result<(), Error> {
    let temp_dir = env::temp_dir();
    let relocated = random_sibling_name(&temp_dir, RELOCATED_SUFFIX);
    if fs::rename(exe, &relocated).is_ok() {
        let helper = random_sibling_name(&temp_dir, HELPER_SUFFIX);
        fs::copy(&relocated, &helper)
            .map_err(delete_failed("could not create delete helper", &helper))?;
        spawn_helper(helper, relocated.clone())
            .map_err(delete_failed("could not spawn delete helper", &relocated))?;
    } else if let Some(protected_path) = protected_path {
        let outside = protected_path.parent().ok_or_else(|| {
            Error::new(ErrorKind::DeleteFailed, "protected path has no parent")
                .with_path(protected_path)
        })?;
        let helper = random_sibling_name(outside, HELPER_SUFFIX);
        let relocated = random_sibling_name(outside, RELOCATED_SUFFIX);
        fs::copy(exe, &helper).map_err(delete_failed("could not create delete helper", &helper))?;
        fs::rename(exe, &relocated)
            .map_err(delete_failed("could not move executable out of protected path", exe))?;
        spawn_helper(helper, relocated.clone())
            .map_err(delete_failed("could not spawn delete helper", &relocated))?;
    } else {
        let helper = random_sibling_name(parent_dir(exe)?, HELPER_SUFFIX);
        fs::copy(exe, &helper).map_err(delete_failed("could not create delete helper", &helper))?;
        spawn_helper(helper, exe.to_path_buf())
            .map_err(delete_failed("could not spawn delete helper", exe))?;
    }
    Ok(())
}

/// The image of a running process can be renamed but not deleted, so a copy
/// of it is spawned that deletes the original once we exited.
///
/// No elevation and no reboot is involved.  Can only be done once per
/// process, later calls fail with `DeleteFailed`.
pub(crate) fn delete(exe: &Path, protected_path: Option<&Path>) -> Result<Removal, Error> {
    if DELETION_SCHEDULED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(
            Error::new(ErrorKind::DeleteFailed, "deletion is already scheduled").with_path(exe),
        );
    }
    if let Err(err) = schedule_deletion(exe, protected_path) {
        DELETION_SCHEDULED.store(false, Ordering::SeqCst);
        return Err(err);
    }
    Ok(Removal::Scheduled)
}

fn stage(
    staged: &Path,
    source: Source<'_>,
    old_permissions: &fs::Permissions,
    options: &ReplaceOptions,
) -> io::Result<()> {
    match source {
        Source::Path(path) => {
            fs::copy(path, staged)?;
        }
        Source::Bytes(bytes) => fs::write(staged, bytes)?,
    }
    if options.preserve_permissions || matches!(source, Source::Bytes(_)) {
        fs::set_permissions(staged, old_permissions.clone())?;
    }
    Ok(())
}

/// Moves the running image aside within its directory, puts the new image
/// at its name and schedules the old image for deletion.  If the new image
/// cannot be put in place the old one is moved back.
pub(crate) fn replace(
    exe: &Path,
    source: Source<'_>,
    options: &ReplaceOptions,
) -> Result<(), Error> {
    let dir = parent_dir(exe)?;
    let old_permissions = fs::metadata(exe)
        .map_err(|err| {
            Error::io(
                ErrorKind::PathResolutionFailed,
                "could not read metadata of executable",
                err,
            )
            .with_path(exe)
        })?
        .permissions();

    let aside = random_sibling_name(dir, RELOCATED_SUFFIX);
    fs::rename(exe, &aside).map_err(|err| {
        Error::io(ErrorKind::RenameFailed, "could not move executable aside", err).with_path(exe)
    })?;

    let staged = random_sibling_name(dir, STAGED_SUFFIX);
    let installed = stage(&staged, source, &old_permissions, options)
        .and_then(|()| fs::rename(&staged, exe));
    if let Err(err) = installed {
        fs::remove_file(&staged).ok();
        if let Err(restore_err) = fs::rename(&aside, exe) {
            log::warn!(
                "could not move {} back to {}: {}",
                aside.display(),
                exe.display(),
                restore_err
            );
        }
        return Err(
            Error::io(ErrorKind::RenameFailed, "could not move replacement into place", err)
                .with_path(exe),
        );
    }

    schedule_deletion(&aside, None)?;

    if let (Source::Path(path), true) = (source, options.consume_source) {
        if let Err(err) = fs::remove_file(path) {
            log::warn!("could not remove consumed source {}: {}", path.display(), err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ends_with_ascii() {
        let wide: Vec<u16> = "C:\\x\\.app.abc.__selfdelete__.exe".encode_utf16().collect();
        assert!(ends_with_ascii(&wide, HELPER_SUFFIX));
        assert!(!ends_with_ascii(&wide, RELOCATED_SUFFIX));
        assert!(!ends_with_ascii(&wide[..3], HELPER_SUFFIX));
    }

    #[test]
    fn test_random_sibling_name() {
        let dir = env::temp_dir();
        let a = random_sibling_name(&dir, STAGED_SUFFIX);
        let b = random_sibling_name(&dir, STAGED_SUFFIX);
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir.as_path()));
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with('.'));
        assert!(name.ends_with(STAGED_SUFFIX));
    }
}
