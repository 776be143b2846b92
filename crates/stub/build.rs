use std::env;

fn main() {
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_default();

    println!("cargo:rerun-if-changed={dir}/stub.ld");
    if arch == "aarch64" && os == "none" {
        println!("cargo:rustc-link-arg-bins=-T{dir}/stub.ld");
    }
}
