use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
};

pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    pub bindings: Vec<vk::DescriptorSetLayoutBinding>,
    device: Weak<Device>,
}

impl DescriptorSetLayout {
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::default()
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping descriptor set layout {:?}", self.handle);
                unsafe {
                    device
                        .handle
                        .destroy_descriptor_set_layout(self.handle, None)
                };
            }
            None => tracing::warn!(
                "Device dropped before descriptor set layout {:?}, leaking it",
                self.handle
            ),
        }
    }
}

#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    device: Option<Weak<Device>>,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(descriptor_count)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    pub fn build(self) -> anyhow::Result<DescriptorSetLayout> {
        let device = device::resolve(&self.device, "DescriptorSetLayout")?;
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let handle = unsafe { device.handle.create_descriptor_set_layout(&create_info, None) }
            .context("DescriptorSetLayout::build: vkCreateDescriptorSetLayout")?;
        tracing::debug!(
            "Created descriptor set layout {:?} with {} bindings",
            handle,
            self.bindings.len()
        );
        Ok(DescriptorSetLayout {
            handle,
            bindings: self.bindings,
            device: Arc::downgrade(&device),
        })
    }
}

pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    pub flags: vk::DescriptorPoolCreateFlags,
    device: Weak<Device>,
}

impl DescriptorPool {
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::default()
    }

    pub fn device(&self) -> anyhow::Result<Arc<Device>> {
        device::upgrade(&self.device)
    }

    fn frees_sets(&self) -> bool {
        self.flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping descriptor pool {:?}", self.handle);
                unsafe { device.handle.destroy_descriptor_pool(self.handle, None) };
            }
            None => tracing::warn!(
                "Device dropped before descriptor pool {:?}, leaking it",
                self.handle
            ),
        }
    }
}

#[derive(Default)]
pub struct DescriptorPoolBuilder {
    device: Option<Weak<Device>>,
    flags: vk::DescriptorPoolCreateFlags,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl DescriptorPoolBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    /// `FREE_DESCRIPTOR_SET` lets sets return themselves to the pool on drop.
    pub fn flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    pub fn pool_size(mut self, ty: vk::DescriptorType, descriptor_count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        });
        self
    }

    pub fn build(self) -> anyhow::Result<DescriptorPool> {
        let device = device::resolve(&self.device, "DescriptorPool")?;
        if self.pool_sizes.is_empty() {
            return Err(Error::MissingField {
                builder: "DescriptorPool",
                field: "pool_sizes",
            }
            .into());
        }
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(self.flags)
            .max_sets(self.max_sets)
            .pool_sizes(&self.pool_sizes);
        let handle = unsafe { device.handle.create_descriptor_pool(&create_info, None) }
            .context("DescriptorPool::build: vkCreateDescriptorPool")?;
        tracing::debug!("Created descriptor pool {:?} ({} sets)", handle, self.max_sets);
        Ok(DescriptorPool {
            handle,
            flags: self.flags,
            device: Arc::downgrade(&device),
        })
    }
}

/// Owned counterpart of `vk::WriteDescriptorSet` for one binding.
#[derive(Debug, Clone)]
pub enum WriteDescriptorSet {
    Buffers {
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        infos: Vec<vk::DescriptorBufferInfo>,
    },
    Images {
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        infos: Vec<vk::DescriptorImageInfo>,
    },
}

impl WriteDescriptorSet {
    pub fn uniform_buffer(binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        WriteDescriptorSet::Buffers {
            binding,
            array_element: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            infos: vec![vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }],
        }
    }

    pub fn combined_image_sampler(
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        WriteDescriptorSet::Images {
            binding,
            array_element: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            infos: vec![vk::DescriptorImageInfo {
                sampler,
                image_view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }],
        }
    }

    /// The returned builder borrows the descriptor infos held by `self`.
    fn to_vk(&self, dst_set: vk::DescriptorSet) -> vk::WriteDescriptorSetBuilder<'_> {
        match self {
            WriteDescriptorSet::Buffers {
                binding,
                array_element,
                descriptor_type,
                infos,
            } => vk::WriteDescriptorSet::builder()
                .dst_set(dst_set)
                .dst_binding(*binding)
                .dst_array_element(*array_element)
                .descriptor_type(*descriptor_type)
                .buffer_info(infos),
            WriteDescriptorSet::Images {
                binding,
                array_element,
                descriptor_type,
                infos,
            } => vk::WriteDescriptorSet::builder()
                .dst_set(dst_set)
                .dst_binding(*binding)
                .dst_array_element(*array_element)
                .descriptor_type(*descriptor_type)
                .image_info(infos),
        }
    }
}

pub struct DescriptorSet {
    pub handle: vk::DescriptorSet,
    pool: Weak<DescriptorPool>,
}

impl DescriptorSet {
    pub fn builder() -> DescriptorSetBuilder {
        DescriptorSetBuilder::default()
    }

    pub fn update(&self, writes: &[WriteDescriptorSet]) -> anyhow::Result<()> {
        let pool = self
            .pool
            .upgrade()
            .ok_or(Error::Expired("DescriptorPool"))?;
        let device = pool.device()?;
        let writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| write.to_vk(self.handle).build())
            .collect();
        unsafe { device.handle.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        if !pool.frees_sets() {
            return;
        }
        match pool.device.upgrade() {
            Some(device) => {
                tracing::debug!("Freeing descriptor set {:?}", self.handle);
                if let Err(error) =
                    unsafe { device.handle.free_descriptor_sets(pool.handle, &[self.handle]) }
                {
                    tracing::warn!("vkFreeDescriptorSets failed for {:?}: {error}", self.handle);
                }
            }
            None => tracing::warn!(
                "Device dropped before descriptor set {:?}, leaking it",
                self.handle
            ),
        }
    }
}

#[derive(Default)]
pub struct DescriptorSetBuilder {
    pool: Option<Weak<DescriptorPool>>,
    layouts: Vec<vk::DescriptorSetLayout>,
    writes: Vec<WriteDescriptorSet>,
}

impl DescriptorSetBuilder {
    pub fn pool(mut self, pool: &Arc<DescriptorPool>) -> Self {
        self.pool = Some(Arc::downgrade(pool));
        self
    }

    pub fn layout(mut self, layout: &DescriptorSetLayout) -> Self {
        self.layouts.push(layout.handle);
        self
    }

    /// Applied to every allocated set right after allocation.
    pub fn write(mut self, write: WriteDescriptorSet) -> Self {
        self.writes.push(write);
        self
    }

    /// Allocates one set per layout.
    pub fn build(self) -> anyhow::Result<Vec<DescriptorSet>> {
        let pool = self
            .pool
            .as_ref()
            .ok_or(Error::MissingField {
                builder: "DescriptorSet",
                field: "pool",
            })?
            .upgrade()
            .ok_or(Error::Expired("DescriptorPool"))?;
        if self.layouts.is_empty() {
            return Err(Error::MissingField {
                builder: "DescriptorSet",
                field: "layouts",
            }
            .into());
        }
        let device = pool.device()?;
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool.handle)
            .set_layouts(&self.layouts);
        let handles = unsafe { device.handle.allocate_descriptor_sets(&allocate_info) }
            .context("DescriptorSet::build: vkAllocateDescriptorSets")?;
        tracing::debug!("Allocated {} descriptor sets from {:?}", handles.len(), pool.handle);

        let sets: Vec<DescriptorSet> = handles
            .into_iter()
            .map(|handle| DescriptorSet {
                handle,
                pool: Arc::downgrade(&pool),
            })
            .collect();
        if !self.writes.is_empty() {
            for set in &sets {
                set.update(&self.writes).context("DescriptorSet::build")?;
            }
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn buffer_write_targets_set_and_binding() {
        let write = WriteDescriptorSet::uniform_buffer(2, vk::Buffer::from_raw(7), 64);
        let set = vk::DescriptorSet::from_raw(9);
        let raw = write.to_vk(set).build();
        assert_eq!(raw.dst_set, set);
        assert_eq!(raw.dst_binding, 2);
        assert_eq!(raw.descriptor_count, 1);
        assert_eq!(raw.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert!(raw.p_image_info.is_null());
    }

    #[test]
    fn image_write_points_at_owned_infos() {
        let write = WriteDescriptorSet::combined_image_sampler(
            1,
            vk::ImageView::from_raw(3),
            vk::Sampler::from_raw(4),
        );
        let raw = write.to_vk(vk::DescriptorSet::null()).build();
        let WriteDescriptorSet::Images { infos, .. } = &write else {
            panic!("expected image write");
        };
        assert_eq!(raw.p_image_info, infos.as_ptr());
        assert_eq!(raw.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn set_builder_requires_pool() {
        let error = DescriptorSet::builder().build().err().unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::MissingField {
                builder: "DescriptorSet",
                field: "pool"
            })
        ));
    }
}
