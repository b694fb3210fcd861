fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let macos = std::env::var("CARGO_CFG_TARGET_OS").map(|os| os == "macos").unwrap_or(false);
    let multitouch = std::env::var_os("CARGO_FEATURE_MULTITOUCH").is_some();

    if macos && multitouch {
        // MultitouchSupport is a private framework and not on the default
        // framework search path.
        println!("cargo:rustc-link-search=framework=/System/Library/PrivateFrameworks");
        println!("cargo:rustc-link-lib=framework=MultitouchSupport");
        println!("cargo:rustc-link-lib=framework=CoreFoundation");
    }
}
