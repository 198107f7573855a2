use std::{
    io::Cursor,
    sync::{Arc, Weak},
};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
};

pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    device: Weak<Device>,
}

impl ShaderModule {
    pub fn builder() -> ShaderModuleBuilder {
        ShaderModuleBuilder::default()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping shader module {:?}", self.handle);
                unsafe { device.handle.destroy_shader_module(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before shader module {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Default)]
pub struct ShaderModuleBuilder {
    device: Option<Weak<Device>>,
    code: Vec<u32>,
}

impl ShaderModuleBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn code(mut self, words: impl Into<Vec<u32>>) -> Self {
        self.code = words.into();
        self
    }

    /// SPIR-V as raw bytes; checks size and magic number.
    pub fn bytes(mut self, bytes: &[u8]) -> anyhow::Result<Self> {
        self.code = ash::util::read_spv(&mut Cursor::new(bytes)).context("reading SPIR-V")?;
        Ok(self)
    }

    pub fn build(self) -> anyhow::Result<ShaderModule> {
        let device = device::resolve(&self.device, "ShaderModule")?;
        if self.code.is_empty() {
            return Err(Error::MissingField {
                builder: "ShaderModule",
                field: "code",
            }
            .into());
        }
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&self.code);
        let handle = unsafe { device.handle.create_shader_module(&create_info, None) }
            .context("ShaderModule::build: vkCreateShaderModule")?;
        tracing::debug!("Created shader module {:?} ({} words)", handle, self.code.len());
        Ok(ShaderModule {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}
