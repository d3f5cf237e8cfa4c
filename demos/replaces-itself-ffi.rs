//! Goes through the C ABI the way a foreign caller would.
use std::ffi::CString;

use replace_exe::ffi::{re_last_error, re_self_replace};

fn main() {
    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: replaces-itself-ffi <new_exe_path>");
            std::process::exit(1);
        }
    };

    let c_path = CString::new(path).unwrap();
    let rv = unsafe { re_self_replace(c_path.as_ptr()) };
    println!("re_self_replace returned {}", rv);
    assert_eq!(re_last_error(), rv);
}
