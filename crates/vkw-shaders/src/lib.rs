//! GLSL to SPIR-V compilation.
//!
//! Shaders are compiled at run time with shaderc. The colored cube sources
//! used by the demo are embedded in the crate.

use thiserror::Error;
use tracing::debug;
use vkw_gpu::vk;
use vkw_gpu::GpuError;

/// Vertex shader for the colored cube: position and color in, MVP uniform at binding 0.
pub const CUBE_VERTEX_SOURCE: &str = include_str!("../shaders/cube.vert");

/// Fragment shader for the colored cube: passes the interpolated color through.
pub const CUBE_FRAGMENT_SOURCE: &str = include_str!("../shaders/cube.frag");

/// Shader compilation errors.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to initialize the shader compiler")]
    CompilerUnavailable,

    #[error("No shader kind for stage {0:?}")]
    UnsupportedStage(vk::ShaderStageFlags),

    #[error("Failed to compile {name}: {message}")]
    Compile { name: String, message: String },
}

impl From<ShaderError> for GpuError {
    fn from(err: ShaderError) -> Self {
        Self::ShaderCompileFailed(err.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ShaderError>;

/// Map a single pipeline stage onto the compiler's shader kind.
pub fn shader_kind(stage: vk::ShaderStageFlags) -> Result<shaderc::ShaderKind> {
    let kind = match stage {
        vk::ShaderStageFlags::VERTEX => shaderc::ShaderKind::Vertex,
        vk::ShaderStageFlags::FRAGMENT => shaderc::ShaderKind::Fragment,
        vk::ShaderStageFlags::COMPUTE => shaderc::ShaderKind::Compute,
        vk::ShaderStageFlags::GEOMETRY => shaderc::ShaderKind::Geometry,
        vk::ShaderStageFlags::TESSELLATION_CONTROL => shaderc::ShaderKind::TessControl,
        vk::ShaderStageFlags::TESSELLATION_EVALUATION => shaderc::ShaderKind::TessEvaluation,
        vk::ShaderStageFlags::TASK_EXT => shaderc::ShaderKind::Task,
        vk::ShaderStageFlags::MESH_EXT => shaderc::ShaderKind::Mesh,
        other => return Err(ShaderError::UnsupportedStage(other)),
    };
    Ok(kind)
}

fn stage_name(stage: vk::ShaderStageFlags) -> &'static str {
    match stage {
        vk::ShaderStageFlags::VERTEX => "shader.vert",
        vk::ShaderStageFlags::FRAGMENT => "shader.frag",
        vk::ShaderStageFlags::COMPUTE => "shader.comp",
        vk::ShaderStageFlags::GEOMETRY => "shader.geom",
        vk::ShaderStageFlags::TESSELLATION_CONTROL => "shader.tesc",
        vk::ShaderStageFlags::TESSELLATION_EVALUATION => "shader.tese",
        _ => "shader.glsl",
    }
}

/// Compile GLSL source for one stage into SPIR-V words.
///
/// The entry point is `main` and the target environment is Vulkan 1.2.
pub fn glsl_to_spirv(stage: vk::ShaderStageFlags, source: &str) -> Result<Vec<u32>> {
    let kind = shader_kind(stage)?;
    let name = stage_name(stage);

    let compiler = shaderc::Compiler::new().ok_or(ShaderError::CompilerUnavailable)?;
    let mut options = shaderc::CompileOptions::new().ok_or(ShaderError::CompilerUnavailable)?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let artifact = compiler
        .compile_into_spirv(source, kind, name, "main", Some(&options))
        .map_err(|e| ShaderError::Compile {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    if artifact.get_num_warnings() > 0 {
        tracing::warn!("{name}: {}", artifact.get_warning_messages());
    }

    let words = artifact.as_binary().to_vec();
    debug!("Compiled {name} to {} SPIR-V words", words.len());
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn cube_vertex_shader_compiles() {
        let words = glsl_to_spirv(vk::ShaderStageFlags::VERTEX, CUBE_VERTEX_SOURCE).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
        assert!(words.len() > 20);
    }

    #[test]
    fn cube_fragment_shader_compiles() {
        let words = glsl_to_spirv(vk::ShaderStageFlags::FRAGMENT, CUBE_FRAGMENT_SOURCE).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn syntax_errors_become_shader_compile_failed() {
        let err = glsl_to_spirv(vk::ShaderStageFlags::FRAGMENT, "#version 450\nvoid main( {")
            .unwrap_err();
        assert!(matches!(err, ShaderError::Compile { .. }));

        let gpu: GpuError = err.into();
        assert!(matches!(gpu, GpuError::ShaderCompileFailed(_)));
    }

    #[test]
    fn combined_stages_are_rejected() {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        assert!(matches!(
            shader_kind(stages),
            Err(ShaderError::UnsupportedStage(_))
        ));
    }
}
