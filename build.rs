// Compiles the GLSL sources under shaders/ to SPIR-V with glslc. When the
// Vulkan SDK is not installed the build still succeeds; the binary will
// report the missing .spv files at startup instead.

use std::path::PathBuf;
use std::process::Command;

const SHADERS: &[&str] = &["shaders/triangle.vert", "shaders/triangle.frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    for source in SHADERS {
        let output = PathBuf::from(format!("{source}.spv"));
        match Command::new("glslc").arg(source).arg("-o").arg(&output).status() {
            Ok(status) if status.success() => {
                println!("compiled {} -> {}", source, output.display());
            }
            Ok(status) => {
                panic!("glslc failed on {}: exit code {:?}", source, status.code());
            }
            Err(e) => {
                println!(
                    "cargo:warning=glslc not found ({e}); compile shaders manually: \
                     glslc {source} -o {}",
                    output.display()
                );
            }
        }
    }
}
