use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Embed the short git hash when building from a checkout; empty when the
    // source tree is not a git repository (e.g. a published crate archive).
    let hash = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);

    let build_version = match (hash.is_empty(), dirty) {
        (true, _) => String::new(),
        (false, true) => format!("{}-dirty", hash),
        (false, false) => hash,
    };

    println!("cargo:rustc-env=BUILD_VERSION={}", build_version);
}
