use std::env::consts::EXE_EXTENSION;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::{env, fs};

fn compile_example(name: &str) {
    let status = Command::new("cargo")
        .arg("build")
        .arg("--example")
        .arg(name)
        .status()
        .unwrap();
    assert!(status.success());
}

fn get_executable(name: &str, tempdir: &Path) -> PathBuf {
    let exe = env::current_exe()
        .unwrap()
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("examples")
        .join(name)
        .with_extension(EXE_EXTENSION);
    let final_exe = tempdir.join(exe.file_name().unwrap());
    fs::copy(&exe, &final_exe).unwrap();
    final_exe
}

fn run_with_args(path: &Path, args: &[&Path]) -> Output {
    let output = Command::new(path).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "{} failed: {}",
        path.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    #[cfg(windows)]
    {
        // takes a bit
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    output
}

fn run(path: &Path, expected_output: &str) -> Output {
    let output = run_with_args(path, &[]);
    let stdout = std::str::from_utf8(&output.stdout).unwrap();
    assert_eq!(stdout.trim(), expected_output);
    output
}

#[test]
fn test_self_delete() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("deletes-itself");
    let exe = get_executable("deletes-itself", tempdir.path());
    assert!(exe.is_file());
    let output = run(&exe, "When I finish, I am deleted");
    assert!(!exe.is_file());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("still running"), "{}", stderr);
    assert!(stderr.contains("second delete failed"), "{}", stderr);
    #[cfg(unix)]
    assert!(stderr.contains("Removed"), "{}", stderr);
    #[cfg(windows)]
    assert!(stderr.contains("Scheduled"), "{}", stderr);
}

#[test]
fn test_self_delete_at() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("deletes-itself-at");
    let exe = get_executable("deletes-itself-at", tempdir.path());
    assert!(exe.is_file());
    run(&exe, "When I finish, I am deleted");
    assert!(!exe.is_file());
    #[cfg(unix)]
    assert_eq!(fs::read_dir(tempdir.path()).unwrap().count(), 0);
}

#[test]
fn test_self_delete_outside_path() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("deletes-itself-outside-path");
    let exe = get_executable("deletes-itself-outside-path", tempdir.path());
    assert!(exe.is_file());
    assert!(tempdir.path().is_dir());
    run(&exe, "When I finish, all of my parent folder is gone.");
    assert!(!exe.is_file());
    assert!(!tempdir.path().is_dir());
}

#[test]
fn test_self_replace() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("replaces-itself");
    compile_example("hello");

    let exe = get_executable("replaces-itself", tempdir.path());
    let hello = get_executable("hello", tempdir.path());

    assert!(exe.is_file());
    assert!(hello.is_file());
    #[cfg(unix)]
    let old_ino = {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(&exe).unwrap().ino()
    };

    run(&exe, "Next time I run, I am the hello executable");
    assert!(exe.is_file());
    assert!(hello.is_file());
    assert_eq!(fs::read(&exe).unwrap(), fs::read(&hello).unwrap());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        assert_ne!(fs::metadata(&exe).unwrap().ino(), old_ino);
    }
    run(&exe, "Hello World!");
}

#[test]
fn test_self_replace_with() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("replaces-itself-with");
    compile_example("hello");

    let exe = get_executable("replaces-itself-with", tempdir.path());
    let hello = get_executable("hello", tempdir.path());

    run(&exe, "Next time I run, I am the hello executable");
    assert_eq!(fs::read(&exe).unwrap(), fs::read(&hello).unwrap());
    run(&exe, "Hello World!");
}

#[test]
fn test_self_replace_through_c_abi() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("replaces-itself-ffi");
    compile_example("hello");

    let exe = get_executable("replaces-itself-ffi", tempdir.path());
    let hello = get_executable("hello", tempdir.path());
    let hello_bytes = fs::read(&hello).unwrap();
    assert_ne!(fs::metadata(&exe).unwrap().len(), hello_bytes.len() as u64);

    let output = run_with_args(&exe, &[&hello]);
    let stdout = std::str::from_utf8(&output.stdout).unwrap();
    assert_eq!(stdout.trim(), "re_self_replace returned 0");
    assert_eq!(fs::read(&exe).unwrap(), hello_bytes);
    run(&exe, "Hello World!");
}

#[test]
fn test_self_replace_missing_source() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("replaces-itself-ffi");

    let exe = get_executable("replaces-itself-ffi", tempdir.path());
    let before = fs::read(&exe).unwrap();

    let output = run_with_args(&exe, &[Path::new("/nonexistent/file")]);
    let stdout = std::str::from_utf8(&output.stdout).unwrap();
    assert_eq!(
        stdout.trim(),
        format!(
            "re_self_replace returned {}",
            replace_exe::ErrorKind::SourceMissing.code()
        )
    );
    assert_eq!(fs::read(&exe).unwrap(), before);
    assert_eq!(fs::read_dir(tempdir.path()).unwrap().count(), 1);
}

#[cfg(unix)]
#[test]
fn test_resolve_through_symlink() {
    let tempdir = tempfile::tempdir().unwrap();
    compile_example("resolves-itself");

    let exe = get_executable("resolves-itself", tempdir.path());
    let link = tempdir.path().join("app");
    std::os::unix::fs::symlink(&exe, &link).unwrap();

    let output = run_with_args(&link, &[]);
    let resolved = PathBuf::from(std::str::from_utf8(&output.stdout).unwrap().trim());
    assert!(resolved.is_absolute());
    assert!(replace_exe::is_same_file(&resolved, &exe).unwrap());
    assert!(replace_exe::is_same_file(&resolved, &link).unwrap());
    assert_eq!(resolved, exe.canonicalize().unwrap());
}

// On Windows the path is briefly missing between moving the old executable
// aside and moving the new one in.
#[cfg(unix)]
#[test]
fn test_reader_never_sees_partial_executable() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    compile_example("replaces-itself");
    compile_example("hello");

    for _ in 0..5 {
        let tempdir = tempfile::tempdir().unwrap();
        let exe = get_executable("replaces-itself", tempdir.path());
        let hello = get_executable("hello", tempdir.path());
        let old_bytes = fs::read(&exe).unwrap();
        let new_bytes = fs::read(&hello).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let done = done.clone();
            let exe = exe.clone();
            thread::spawn(move || loop {
                let contents = fs::read(&exe).unwrap();
                assert!(
                    contents == old_bytes || contents == new_bytes,
                    "observed a partial executable of {} bytes",
                    contents.len()
                );
                if done.load(Ordering::SeqCst) {
                    break;
                }
            })
        };

        run(&exe, "Next time I run, I am the hello executable");
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();
        assert_eq!(fs::read(&exe).unwrap(), fs::read(&hello).unwrap());
    }
}
