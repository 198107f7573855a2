#![allow(dead_code)]

use std::{
    cell::RefCell,
    ffi::{c_char, CString},
};

use anyhow::anyhow;
use vulkan_raii::{
    ash::vk::{self, Handle},
    PhysicalDeviceQueries, SurfaceQueries,
};

/// A physical device as the fake driver reports it.
#[derive(Clone)]
pub struct FakeDevice {
    pub handle: vk::PhysicalDevice,
    pub name: &'static str,
    pub device_type: vk::PhysicalDeviceType,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<CString>,
    /// Family indices that can present to the fake surface.
    pub present_families: Vec<u32>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Makes the extension query fail like a lost device would.
    pub extension_query_fails: bool,
}

impl FakeDevice {
    pub fn new(raw: u64, name: &'static str) -> Self {
        Self {
            handle: vk::PhysicalDevice::from_raw(raw),
            name,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            features: vk::PhysicalDeviceFeatures::default(),
            queue_families: Vec::new(),
            extensions: Vec::new(),
            present_families: Vec::new(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            extension_query_fails: false,
        }
    }

    pub fn family(mut self, flags: vk::QueueFlags, queue_count: u32) -> Self {
        self.queue_families.push(vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            timestamp_valid_bits: 64,
            ..Default::default()
        });
        self
    }

    pub fn presents_from(mut self, family_indices: &[u32]) -> Self {
        self.present_families = family_indices.to_vec();
        self
    }

    pub fn extension(mut self, name: &std::ffi::CStr) -> Self {
        self.extensions.push(name.to_owned());
        self
    }

    pub fn failing_extension_query(mut self) -> Self {
        self.extension_query_fails = true;
        self
    }

    pub fn device_type(mut self, device_type: vk::PhysicalDeviceType) -> Self {
        self.device_type = device_type;
        self
    }
}

/// Fake driver implementing both query traits over a fixed device list.
#[derive(Default)]
pub struct FakeDriver {
    pub devices: Vec<FakeDevice>,
    /// Every `(device, family)` the present probe was asked about.
    pub present_probes: RefCell<Vec<(vk::PhysicalDevice, u32)>>,
}

impl FakeDriver {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            present_probes: RefCell::new(Vec::new()),
        }
    }

    fn device(&self, handle: vk::PhysicalDevice) -> anyhow::Result<&FakeDevice> {
        self.devices
            .iter()
            .find(|device| device.handle == handle)
            .ok_or_else(|| anyhow!("unknown physical device {handle:?}"))
    }

    fn known(&self, handle: vk::PhysicalDevice) -> &FakeDevice {
        self.device(handle).expect("queried a device that was never enumerated")
    }
}

fn device_name(name: &str) -> [c_char; vk::MAX_PHYSICAL_DEVICE_NAME_SIZE] {
    let mut raw = [0 as c_char; vk::MAX_PHYSICAL_DEVICE_NAME_SIZE];
    for (slot, byte) in raw.iter_mut().zip(name.bytes()) {
        *slot = byte as c_char;
    }
    raw
}

impl PhysicalDeviceQueries for FakeDriver {
    fn physical_devices(&self) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        Ok(self.devices.iter().map(|device| device.handle).collect())
    }

    fn properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let device = self.known(physical_device);
        vk::PhysicalDeviceProperties {
            device_type: device.device_type,
            device_name: device_name(device.name),
            ..Default::default()
        }
    }

    fn features(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        self.known(physical_device).features
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.known(physical_device).queue_families.clone()
    }

    fn memory_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        vk::PhysicalDeviceMemoryProperties::default()
    }

    fn extension_names(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<CString>> {
        let device = self.device(physical_device)?;
        if device.extension_query_fails {
            return Err(vk::Result::ERROR_DEVICE_LOST.into());
        }
        Ok(device.extensions.clone())
    }

    fn format_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
        _format: vk::Format,
    ) -> vk::FormatProperties {
        vk::FormatProperties::default()
    }
}

impl SurfaceQueries for FakeDriver {
    fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> anyhow::Result<bool> {
        self.present_probes
            .borrow_mut()
            .push((physical_device, family_index));
        Ok(self
            .device(physical_device)?
            .present_families
            .contains(&family_index))
    }

    fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<vk::SurfaceCapabilitiesKHR> {
        self.device(physical_device)?;
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        })
    }

    fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.device(physical_device)?.formats.clone())
    }

    fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::PresentModeKHR>> {
        Ok(self.device(physical_device)?.present_modes.clone())
    }
}
