use std::process::Command;

fn main() {
    // `--version` reports the commit the binary was built from.
    let describe = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    println!(
        "cargo:rustc-env=SNAPSCHED_GIT_SHA={}",
        describe.as_deref().unwrap_or("unknown")
    );
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
}
