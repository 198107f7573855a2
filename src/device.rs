use std::{
    ffi::{CStr, CString},
    sync::{Arc, Weak},
};

use anyhow::Context;
use ash::{extensions::khr, vk};

use crate::{
    error::Error,
    instance::Instance,
    physical_device::PhysicalDeviceSelection,
    queue_family::{QueueCreateInfo, QueueType},
};

#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
    pub index: u32,
}

pub struct Device {
    pub handle: ash::Device,
    pub instance: Arc<Instance>,
    pub selection: PhysicalDeviceSelection,
    pub enabled_extensions: Vec<CString>,
    pub dynamic_rendering: Option<khr::DynamicRendering>,
}

impl Device {
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.selection.handle()
    }

    pub fn queue(&self, family_index: u32, index: u32) -> Queue {
        Queue {
            handle: unsafe { self.handle.get_device_queue(family_index, index) },
            family_index,
            index,
        }
    }

    /// First queue of the first family serving `queue_type`.
    pub fn queue_for(&self, queue_type: QueueType) -> Option<Queue> {
        first_family(self.selection.queues.for_type(queue_type))
            .map(|family_index| self.queue(family_index, 0))
    }

    pub fn present_queue(&self) -> Option<Queue> {
        first_family(&self.selection.queues.present).map(|family_index| self.queue(family_index, 0))
    }

    pub fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { self.handle.device_wait_idle() }.context("vkDeviceWaitIdle")
    }
}

fn first_family(create_infos: &[QueueCreateInfo]) -> Option<u32> {
    create_infos.first().map(|create_info| create_info.family_index)
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        unsafe { self.handle.destroy_device(None) };
    }
}

/// Resolves a builder's device back-reference.
pub(crate) fn resolve(
    device: &Option<Weak<Device>>,
    builder: &'static str,
) -> anyhow::Result<Arc<Device>> {
    device
        .as_ref()
        .ok_or(Error::MissingField {
            builder,
            field: "device",
        })?
        .upgrade()
        .ok_or(Error::Expired("Device"))
        .with_context(|| format!("{builder}::build"))
}

/// Resolves an object's device back-reference at the point of use.
pub(crate) fn upgrade(device: &Weak<Device>) -> anyhow::Result<Arc<Device>> {
    device.upgrade().ok_or_else(|| Error::Expired("Device").into())
}

#[derive(Default)]
pub struct DeviceBuilder {
    instance: Option<Arc<Instance>>,
    selection: Option<PhysicalDeviceSelection>,
    extensions: Vec<CString>,
    layers: Vec<CString>,
    features: vk::PhysicalDeviceFeatures,
    dynamic_rendering: bool,
}

impl DeviceBuilder {
    pub fn instance(mut self, instance: &Arc<Instance>) -> Self {
        self.instance = Some(instance.clone());
        self
    }

    /// The selection's required extensions are enabled as well.
    pub fn physical_device(mut self, selection: PhysicalDeviceSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn extension(mut self, name: &CStr) -> Self {
        self.extensions.push(name.to_owned());
        self
    }

    pub fn layers<'a>(mut self, names: impl IntoIterator<Item = &'a CStr>) -> Self {
        self.layers.extend(names.into_iter().map(CStr::to_owned));
        self
    }

    pub fn features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    /// Enables `VK_KHR_dynamic_rendering` and its feature.
    pub fn dynamic_rendering(mut self, enabled: bool) -> Self {
        self.dynamic_rendering = enabled;
        self
    }

    pub fn build(self) -> anyhow::Result<Device> {
        let instance = self.instance.ok_or(Error::MissingField {
            builder: "Device",
            field: "instance",
        })?;
        let selection = self.selection.ok_or(Error::MissingField {
            builder: "Device",
            field: "physical_device",
        })?;

        let mut extensions = selection.required_extensions.clone();
        extensions.extend(self.extensions);
        if self.dynamic_rendering {
            extensions.push(khr::DynamicRendering::name().to_owned());
        }
        extensions.sort();
        extensions.dedup();

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = selection
            .queues
            .unique
            .iter()
            .map(|create_info| create_info.to_vk().build())
            .collect();
        let extension_names: Vec<_> = extensions.iter().map(|name| name.as_ptr()).collect();
        let layer_names: Vec<_> = self.layers.iter().map(|name| name.as_ptr()).collect();

        let handle = {
            let mut dynamic_rendering_features =
                vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);
            // Device layers are ignored by current loaders; kept for older ones.
            #[allow(deprecated)]
            let mut create_info = vk::DeviceCreateInfo::builder()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&extension_names)
                .enabled_layer_names(&layer_names)
                .enabled_features(&self.features);
            if self.dynamic_rendering {
                create_info = create_info.push_next(&mut dynamic_rendering_features);
            }
            unsafe {
                instance
                    .handle
                    .create_device(selection.handle(), &create_info, None)
            }
            .context("Device::build: vkCreateDevice")?
        };
        tracing::debug!(
            "Created device {:?} on {} with {} queue families",
            handle.handle(),
            selection.physical_device.name,
            queue_create_infos.len()
        );

        let dynamic_rendering = self
            .dynamic_rendering
            .then(|| khr::DynamicRendering::new(&instance.handle, &handle));
        Ok(Device {
            handle,
            instance,
            selection,
            enabled_extensions: extensions,
            dynamic_rendering,
        })
    }
}
