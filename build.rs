fn main() {
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos"))]
    println!("cargo:rustc-link-arg=-fapple-link-rtlib");

    println!("cargo:rustc-link-lib=static=pdfium");
    if let Ok(lib_dir) = std::env::var("PDFIUM_STATIC_LIB_PATH") {
        println!("cargo:rustc-link-search=native={lib_dir}");
    }
    println!("cargo:rerun-if-env-changed=PDFIUM_STATIC_LIB_PATH");
    println!("cargo:rustc-link-lib=dylib=c++");
    // https://github.com/ajrcarey/pdfium-render/issues/126
    #[cfg(target_os = "macos")]
    println!("cargo:rustc-link-lib=framework=CoreGraphics");
}
