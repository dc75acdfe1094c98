// Build script for zonedrillctl - embeds version at compile time

fn main() {
    // Release pipelines may stamp a version; otherwise use Cargo.toml
    let version = std::env::var("ZONEDRILL_VERSION")
        .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=ZONEDRILL_VERSION={}", version);

    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-env-changed=ZONEDRILL_VERSION");
}
