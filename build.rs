use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    // rust-embed bakes the warehouse list into the binary.
    println!("cargo:rerun-if-changed=assets/warehouses.json");
    println!("cargo:rerun-if-env-changed=PARCEL_PORTAL_RELEASE_TAG");

    let tag = std::env::var("PARCEL_PORTAL_RELEASE_TAG")
        .ok()
        .or_else(latest_git_tag)
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty());
    if let Some(tag) = tag {
        println!("cargo:rustc-env=GIT_TAG={tag}");
    }
}

fn latest_git_tag() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--abbrev=0"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}
