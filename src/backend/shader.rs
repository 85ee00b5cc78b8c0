// Shader modules
//
// Loads pre-compiled SPIR-V from disk and wraps the module together with the
// stage it targets, so pipeline creation can ask each shader for its own
// stage create-info.

use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::device::Device;
use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

pub struct Shader {
    module: vk::ShaderModule,
    stage: ShaderStage,
    device: Arc<Device>,
}

impl Shader {
    /// Load a SPIR-V binary from `path`. A missing file is reported with the
    /// path so the build step that produces shaders is easy to diagnose.
    pub fn from_file(
        device: Arc<Device>,
        path: impl AsRef<Path>,
        stage: ShaderStage,
    ) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RenderError::FileNotFound(path.to_path_buf()),
            _ => RenderError::Io(e),
        })?;
        let code = ash::util::read_spv(&mut file)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.raw().create_shader_module(&create_info, device.alloc())? };

        log::debug!("loaded {:?} shader from {}", stage, path.display());

        Ok(Self {
            module,
            stage,
            device,
        })
    }

    /// Stage create-info for pipeline assembly. The entry point is `main`,
    /// matching what glslc emits.
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        const ENTRY: &CStr = c"main";
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.into())
            .module(self.module)
            .name(ENTRY)
            .build()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_shader_module(self.module, self.device.alloc());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_maps_to_vk_flags() {
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Vertex),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Fragment),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Compute),
            vk::ShaderStageFlags::COMPUTE
        );
    }
}
