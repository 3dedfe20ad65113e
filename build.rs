//! Build script for faiss-guard with native faiss support

fn main() {
    #[cfg(feature = "faiss")]
    {
        // FAISS_LIB_DIR overrides the system search path for libfaiss_c
        if let Ok(dir) = std::env::var("FAISS_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", dir);
        }
        println!("cargo:rustc-link-search=native=/usr/local/lib");
        println!("cargo:rustc-link-search=native=/opt/homebrew/lib");
        println!("cargo:rustc-link-lib=dylib=faiss_c");
        println!("cargo:rerun-if-env-changed=FAISS_LIB_DIR");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
