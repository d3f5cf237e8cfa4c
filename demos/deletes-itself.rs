fn main() {
    println!("When I finish, I am deleted");
    let removal = replace_exe::self_delete().unwrap();

    // the image keeps running without its directory entry
    let checksum = (1..=100u64).fold(0u64, |acc, x| acc.wrapping_mul(31).wrapping_add(x));
    eprintln!("{:?}, still running ({})", removal, checksum);

    match replace_exe::self_delete() {
        Ok(removal) => {
            eprintln!("second delete unexpectedly succeeded: {:?}", removal);
            std::process::exit(2);
        }
        Err(err) => eprintln!("second delete failed: {}", err.kind()),
    }

    if std::env::var("FORCE_EXIT").ok().as_deref() == Some("1") {
        std::process::exit(0);
    }
}
