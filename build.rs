// Build script: compile GLSL shaders to SPIR-V next to their sources
//
// The renderer reads the .spv files at runtime, so they can also be rebuilt
// by hand while the app is running (see debug.hot_reload_shaders).

use std::path::Path;
use std::process::Command;

const SHADERS: &[&str] = &["shaders/shader.vert", "shaders/shader.frag"];

fn main() {
    for shader in SHADERS {
        println!("cargo:rerun-if-changed={}", shader);
        compile_shader(shader, &format!("{}.spv", shader));
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    if !input_path.exists() {
        println!("cargo:warning=Shader source {} not found, skipping", input);
        return;
    }

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=Compile manually: glslc {} -o {}", input, output);
        }
    }
}
