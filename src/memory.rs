use std::{
    mem,
    sync::{Arc, Weak},
};

use anyhow::Context;
use ash::{util::Align, vk};

use crate::{
    device::{self, Device},
    error::Error,
};

/// Signature shared by [`memory_type_index`] and caller-supplied overrides on
/// the buffer and image builders.
pub type MemoryTypeIndexFn =
    fn(&vk::PhysicalDeviceMemoryProperties, u32, vk::MemoryPropertyFlags) -> anyhow::Result<u32>;

/// Returns the first memory type allowed by `type_bits` whose property flags
/// contain all of `flags`.
pub fn memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> anyhow::Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            (1 << index) & type_bits != 0 && memory_type.property_flags & flags == flags
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| {
            Error::NoSuitableMemoryType {
                type_bits,
                properties: flags,
            }
            .into()
        })
}

/// A `vk::DeviceMemory` allocation freed on drop.
pub struct DeviceMemory {
    pub handle: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub memory_type_index: u32,
    pub properties: vk::MemoryPropertyFlags,
    device: Weak<Device>,
}

impl DeviceMemory {
    pub fn allocate(
        device: &Arc<Device>,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        select: MemoryTypeIndexFn,
    ) -> anyhow::Result<Self> {
        let memory_type_index = select(
            &device.selection.physical_device.memory_properties,
            requirements.memory_type_bits,
            properties,
        )?;
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let handle = unsafe { device.handle.allocate_memory(&allocate_info, None) }
            .context("vkAllocateMemory")?;
        tracing::debug!(
            "Allocated {} bytes of memory type {} ({:?})",
            requirements.size,
            memory_type_index,
            handle
        );
        Ok(Self {
            handle,
            size: requirements.size,
            memory_type_index,
            properties,
            device: Arc::downgrade(device),
        })
    }

    pub fn device(&self) -> anyhow::Result<Arc<Device>> {
        device::upgrade(&self.device)
    }

    /// Copies `data` into host-visible memory starting at `offset`.
    pub fn fill<T: Copy>(&self, offset: vk::DeviceSize, data: &[T]) -> anyhow::Result<()> {
        let device = self.device()?;
        let size = mem::size_of_val(data) as vk::DeviceSize;
        unsafe {
            let ptr = device
                .handle
                .map_memory(self.handle, offset, size, vk::MemoryMapFlags::empty())
                .context("vkMapMemory")?;
            let mut align = Align::new(ptr, mem::align_of::<T>() as u64, size);
            align.copy_from_slice(data);
            device.handle.unmap_memory(self.handle);
        }
        Ok(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Freeing memory {:?}", self.handle);
                unsafe { device.handle.free_memory(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before memory {:?}, leaking it", self.handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (memory_type, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            memory_type.property_flags = property_flags;
        }
        properties
    }

    #[test]
    fn skips_types_outside_bitmask_and_unsatisfied_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let index = memory_type_index(
            &properties,
            0b101,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn first_match_wins() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let index =
            memory_type_index(&properties, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn oversized_memory_type_count_stays_in_bounds() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_type_count = u32::MAX;
        let error = memory_type_index(&properties, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::NoSuitableMemoryType { .. })
        ));
    }

    #[test]
    fn ignores_types_past_memory_type_count() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let error = memory_type_index(&properties, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::NoSuitableMemoryType { type_bits: 0b11, .. })
        ));
    }
}
