use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=proto/tfaas.proto");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());
    prost_build::Config::new()
        .out_dir(&out_dir)
        .compile_protos(&["proto/tfaas.proto"], &["proto"])
        .expect("failed to compile tfaas.proto");
}
