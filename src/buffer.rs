use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
    image::{distinct_families, sharing_mode},
    memory::{memory_type_index, DeviceMemory, MemoryTypeIndexFn},
};

/// A buffer bound to its own dedicated memory allocation.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: DeviceMemory,
    device: Weak<Device>,
}

impl Buffer {
    pub fn builder() -> BufferBuilder {
        BufferBuilder::default()
    }

    pub fn device(&self) -> anyhow::Result<Arc<Device>> {
        device::upgrade(&self.device)
    }

    /// Copies `data` to the start of the buffer. The memory must be host
    /// visible.
    pub fn fill<T: Copy>(&self, data: &[T]) -> anyhow::Result<()> {
        self.memory.fill(0, data).context("Buffer::fill")
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping buffer {:?}", self.handle);
                unsafe { device.handle.destroy_buffer(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before buffer {:?}, leaking it", self.handle),
        }
    }
}

pub struct BufferBuilder {
    device: Option<Weak<Device>>,
    size: Option<vk::DeviceSize>,
    usage: vk::BufferUsageFlags,
    queue_family_indices: Vec<u32>,
    memory_properties: vk::MemoryPropertyFlags,
    memory_type_index_fn: MemoryTypeIndexFn,
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self {
            device: None,
            size: None,
            usage: vk::BufferUsageFlags::empty(),
            queue_family_indices: Vec::new(),
            memory_properties: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            memory_type_index_fn: memory_type_index,
        }
    }
}

impl BufferBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn size(mut self, size: vk::DeviceSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn queue_family_indices(mut self, indices: impl Into<Vec<u32>>) -> Self {
        self.queue_family_indices = indices.into();
        self
    }

    /// Defaults to host visible and coherent.
    pub fn memory_properties(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.memory_properties = properties;
        self
    }

    pub fn memory_type_index_fn(mut self, select: MemoryTypeIndexFn) -> Self {
        self.memory_type_index_fn = select;
        self
    }

    pub fn build(self) -> anyhow::Result<Buffer> {
        let device = device::resolve(&self.device, "Buffer")?;
        let size = self.size.filter(|size| *size > 0).ok_or(Error::MissingField {
            builder: "Buffer",
            field: "size",
        })?;

        let mut create_info = vk::BufferCreateInfo::builder().size(size).usage(self.usage);
        let queue_family_indices = distinct_families(&self.queue_family_indices);
        create_info = match sharing_mode(&queue_family_indices) {
            vk::SharingMode::CONCURRENT => create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices),
            sharing_mode => create_info.sharing_mode(sharing_mode),
        };
        let handle = unsafe { device.handle.create_buffer(&create_info, None) }
            .context("Buffer::build: vkCreateBuffer")?;

        let requirements = unsafe { device.handle.get_buffer_memory_requirements(handle) };
        let memory = DeviceMemory::allocate(
            &device,
            &requirements,
            self.memory_properties,
            self.memory_type_index_fn,
        )
        .and_then(|memory| {
            unsafe { device.handle.bind_buffer_memory(handle, memory.handle, 0) }
                .context("vkBindBufferMemory")?;
            Ok(memory)
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.handle.destroy_buffer(handle, None) };
                return Err(error.context("Buffer::build"));
            }
        };
        tracing::debug!("Created buffer {:?} ({} bytes, {:?})", handle, size, self.usage);

        Ok(Buffer {
            handle,
            size,
            usage: self.usage,
            memory,
            device: Arc::downgrade(&device),
        })
    }
}
