use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
};

pub struct CommandPool {
    pub handle: vk::CommandPool,
    pub queue_family_index: u32,
    device: Weak<Device>,
}

impl CommandPool {
    pub fn builder() -> CommandPoolBuilder {
        CommandPoolBuilder::default()
    }

    pub fn device(&self) -> anyhow::Result<Arc<Device>> {
        device::upgrade(&self.device)
    }

    pub fn reset(&self) -> anyhow::Result<()> {
        let device = self.device()?;
        unsafe {
            device
                .handle
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())
        }
        .context("vkResetCommandPool")
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping command pool {:?}", self.handle);
                unsafe { device.handle.destroy_command_pool(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before command pool {:?}, leaking it", self.handle),
        }
    }
}

pub struct CommandPoolBuilder {
    device: Option<Weak<Device>>,
    queue_family_index: Option<u32>,
    flags: vk::CommandPoolCreateFlags,
}

impl Default for CommandPoolBuilder {
    fn default() -> Self {
        Self {
            device: None,
            queue_family_index: None,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        }
    }
}

impl CommandPoolBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn queue_family_index(mut self, index: u32) -> Self {
        self.queue_family_index = Some(index);
        self
    }

    pub fn flags(mut self, flags: vk::CommandPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn build(self) -> anyhow::Result<CommandPool> {
        let device = device::resolve(&self.device, "CommandPool")?;
        let queue_family_index = self.queue_family_index.ok_or(Error::MissingField {
            builder: "CommandPool",
            field: "queue_family_index",
        })?;
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(self.flags);
        let handle = unsafe { device.handle.create_command_pool(&create_info, None) }
            .context("CommandPool::build: vkCreateCommandPool")?;
        tracing::debug!(
            "Created command pool {:?} for queue family {}",
            handle,
            queue_family_index
        );
        Ok(CommandPool {
            handle,
            queue_family_index,
            device: Arc::downgrade(&device),
        })
    }
}

/// A command buffer freed back to its pool on drop.
///
/// Holds the pool weakly: once the pool is gone the buffer was freed along
/// with it and drop does nothing.
pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    pub level: vk::CommandBufferLevel,
    pool: Weak<CommandPool>,
}

impl CommandBuffer {
    pub fn builder() -> CommandBufferBuilder {
        CommandBufferBuilder::default()
    }

    pub fn pool(&self) -> anyhow::Result<Arc<CommandPool>> {
        self.pool
            .upgrade()
            .ok_or_else(|| Error::Expired("CommandPool").into())
    }

    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) -> anyhow::Result<()> {
        let device = self.pool()?.device()?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { device.handle.begin_command_buffer(self.handle, &begin_info) }
            .context("vkBeginCommandBuffer")
    }

    pub fn end(&self) -> anyhow::Result<()> {
        let device = self.pool()?.device()?;
        unsafe { device.handle.end_command_buffer(self.handle) }.context("vkEndCommandBuffer")
    }

    pub fn reset(&self) -> anyhow::Result<()> {
        let device = self.pool()?.device()?;
        unsafe {
            device
                .handle
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        }
        .context("vkResetCommandBuffer")
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        match pool.device.upgrade() {
            Some(device) => {
                tracing::debug!("Freeing command buffer {:?}", self.handle);
                unsafe {
                    device
                        .handle
                        .free_command_buffers(pool.handle, &[self.handle])
                };
            }
            None => tracing::warn!(
                "Device dropped before command buffer {:?}, leaking it",
                self.handle
            ),
        }
    }
}

pub struct CommandBufferBuilder {
    pool: Option<Weak<CommandPool>>,
    level: vk::CommandBufferLevel,
    count: u32,
}

impl Default for CommandBufferBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            level: vk::CommandBufferLevel::PRIMARY,
            count: 1,
        }
    }
}

impl CommandBufferBuilder {
    pub fn pool(mut self, pool: &Arc<CommandPool>) -> Self {
        self.pool = Some(Arc::downgrade(pool));
        self
    }

    pub fn level(mut self, level: vk::CommandBufferLevel) -> Self {
        self.level = level;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn build(self) -> anyhow::Result<Vec<CommandBuffer>> {
        let pool = self
            .pool
            .as_ref()
            .ok_or(Error::MissingField {
                builder: "CommandBuffer",
                field: "pool",
            })?
            .upgrade()
            .ok_or(Error::Expired("CommandPool"))?;
        let device = pool.device()?;
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.handle)
            .level(self.level)
            .command_buffer_count(self.count);
        let handles = unsafe { device.handle.allocate_command_buffers(&allocate_info) }
            .context("CommandBuffer::build: vkAllocateCommandBuffers")?;
        tracing::debug!("Allocated {} command buffers from {:?}", handles.len(), pool.handle);
        Ok(handles
            .into_iter()
            .map(|handle| CommandBuffer {
                handle,
                level: self.level,
                pool: Arc::downgrade(&pool),
            })
            .collect())
    }

    /// Allocates exactly one buffer.
    pub fn build_one(self) -> anyhow::Result<CommandBuffer> {
        self.count(1)
            .build()?
            .pop()
            .context("vkAllocateCommandBuffers returned no buffers")
    }
}
