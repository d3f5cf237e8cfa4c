fn main() {
    let path = replace_exe::resolve_self_path().unwrap();
    println!("{}", path.display());
}
