//! Injects the version and git SHA shown in the runner's startup log.
//!
//! - SBC_VERSION: defaults to CARGO_PKG_VERSION
//! - SBC_GIT_SHA: falls back to GITHUB_SHA, then `git rev-parse`

use std::process::Command;

fn main() {
    let version = std::env::var("SBC_VERSION").unwrap_or_else(|_| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".into())
    });
    println!("cargo:rustc-env=SBC_VERSION={}", version);

    let git_sha = std::env::var("SBC_GIT_SHA")
        .or_else(|_| std::env::var("GITHUB_SHA").map(|s| s.chars().take(7).collect()))
        .unwrap_or_else(|_| short_head());
    println!("cargo:rustc-env=SBC_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=SBC_VERSION");
    println!("cargo:rerun-if-env-changed=SBC_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn short_head() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
