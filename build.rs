fn main() {
    // Re-run if git HEAD changes (new commits, checkouts, etc.)
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    let git = |args: &[&str]| {
        std::process::Command::new("git")
            .args(args)
            .output()
            .ok()
            .filter(|o| o.status.success())
    };

    let on_tag = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();
    let hash = git(&["rev-parse", "--short", "HEAD"])
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();

    // Release builds report the crate version; anything else reports the
    // commit it was built from.
    let version = match (on_tag, hash.is_empty()) {
        (true, _) => std::env::var("CARGO_PKG_VERSION").unwrap_or_default(),
        (false, true) => "dev@unknown".to_string(),
        (false, false) => format!("dev@{hash}"),
    };
    println!("cargo:rustc-env=PAGESMITH_VERSION={version}");
}
