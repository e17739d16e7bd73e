// Shader module loading
//
// Shaders are precompiled SPIR-V blobs (see build.rs). Modules only live
// for the duration of pipeline creation.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// SPIR-V words read from disk
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub words: Vec<u32>,
}

impl ShaderCode {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // read_spv handles alignment and byte order
        let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V")?;
        Ok(Self { words })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {:?}", path))?;
        Self::from_bytes(&bytes).with_context(|| format!("Failed to load shader {:?}", path))
    }
}

/// Shader module destroyed when it goes out of scope
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a VulkanDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a VulkanDevice, code: &ShaderCode) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code.words);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;
        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}
