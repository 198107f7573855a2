use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::device::{self, Device};

pub struct Fence {
    pub handle: vk::Fence,
    device: Weak<Device>,
}

impl Fence {
    pub fn builder() -> FenceBuilder {
        FenceBuilder::default()
    }

    pub fn wait(&self, timeout: u64) -> anyhow::Result<()> {
        let device = device::upgrade(&self.device)?;
        unsafe { device.handle.wait_for_fences(&[self.handle], true, timeout) }
            .context("vkWaitForFences")
    }

    pub fn reset(&self) -> anyhow::Result<()> {
        let device = device::upgrade(&self.device)?;
        unsafe { device.handle.reset_fences(&[self.handle]) }.context("vkResetFences")
    }

    pub fn is_signaled(&self) -> anyhow::Result<bool> {
        let device = device::upgrade(&self.device)?;
        unsafe { device.handle.get_fence_status(self.handle) }.context("vkGetFenceStatus")
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping fence {:?}", self.handle);
                unsafe { device.handle.destroy_fence(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before fence {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Default)]
pub struct FenceBuilder {
    device: Option<Weak<Device>>,
    signaled: bool,
}

impl FenceBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn signaled(mut self, signaled: bool) -> Self {
        self.signaled = signaled;
        self
    }

    pub fn build(self) -> anyhow::Result<Fence> {
        let device = device::resolve(&self.device, "Fence")?;
        let flags = if self.signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let handle = unsafe {
            device
                .handle
                .create_fence(&vk::FenceCreateInfo::builder().flags(flags), None)
        }
        .context("Fence::build: vkCreateFence")?;
        tracing::debug!("Created fence {:?}", handle);
        Ok(Fence {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}

pub struct Semaphore {
    pub handle: vk::Semaphore,
    device: Weak<Device>,
}

impl Semaphore {
    pub fn builder() -> SemaphoreBuilder {
        SemaphoreBuilder::default()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping semaphore {:?}", self.handle);
                unsafe { device.handle.destroy_semaphore(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before semaphore {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Default)]
pub struct SemaphoreBuilder {
    device: Option<Weak<Device>>,
}

impl SemaphoreBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn build(self) -> anyhow::Result<Semaphore> {
        let device = device::resolve(&self.device, "Semaphore")?;
        let handle = unsafe {
            device
                .handle
                .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)
        }
        .context("Semaphore::build: vkCreateSemaphore")?;
        tracing::debug!("Created semaphore {:?}", handle);
        Ok(Semaphore {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}
