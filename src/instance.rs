use std::ffi::{CStr, CString};

use anyhow::Context;
use ash::{extensions::ext::DebugUtils, vk};

use crate::{
    error::Error,
    messenger::{Messenger, MessengerCreateInfo},
    physical_device::{PhysicalDevice, PhysicalDeviceQueries},
};

pub struct Instance {
    pub entry: ash::Entry,
    pub handle: ash::Instance,
    pub enabled_layers: Vec<CString>,
    pub enabled_extensions: Vec<CString>,
    pub messenger: Option<Messenger>,
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    pub fn physical_devices(&self) -> anyhow::Result<Vec<PhysicalDevice>> {
        PhysicalDeviceQueries::physical_devices(self)?
            .into_iter()
            .map(|physical_device| PhysicalDevice::query(self, physical_device))
            .collect()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        drop(self.messenger.take());
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl PhysicalDeviceQueries for Instance {
    fn physical_devices(&self) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        unsafe { self.handle.enumerate_physical_devices() }.context("vkEnumeratePhysicalDevices")
    }

    fn properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    fn features(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.handle.get_physical_device_features(physical_device) }
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.handle
                .get_physical_device_memory_properties(physical_device)
        }
    }

    fn extension_names(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<CString>> {
        let extensions = unsafe {
            self.handle
                .enumerate_device_extension_properties(physical_device)
        }
        .context("vkEnumerateDeviceExtensionProperties")?;
        Ok(extensions
            .iter()
            .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }.to_owned())
            .collect())
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        unsafe {
            self.handle
                .get_physical_device_format_properties(physical_device, format)
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceBuilder {
    application_name: CString,
    application_version: u32,
    engine_name: CString,
    engine_version: u32,
    api_version: u32,
    layers: Vec<CString>,
    extensions: Vec<CString>,
    messenger: Option<MessengerCreateInfo>,
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self {
            application_name: c"vulkan-raii".to_owned(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            engine_name: c"vulkan-raii".to_owned(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_3,
            layers: Vec::new(),
            extensions: Vec::new(),
            messenger: None,
        }
    }
}

impl InstanceBuilder {
    pub fn application_name(mut self, name: &str) -> anyhow::Result<Self> {
        self.application_name = CString::new(name)?;
        Ok(self)
    }

    pub fn application_version(mut self, version: u32) -> Self {
        self.application_version = version;
        self
    }

    pub fn engine_name(mut self, name: &str) -> anyhow::Result<Self> {
        self.engine_name = CString::new(name)?;
        Ok(self)
    }

    pub fn engine_version(mut self, version: u32) -> Self {
        self.engine_version = version;
        self
    }

    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn layer(mut self, name: &CStr) -> Self {
        push_unique(&mut self.layers, name);
        self
    }

    pub fn layers<'a>(mut self, names: impl IntoIterator<Item = &'a CStr>) -> Self {
        for name in names {
            push_unique(&mut self.layers, name);
        }
        self
    }

    pub fn extension(mut self, name: &CStr) -> Self {
        push_unique(&mut self.extensions, name);
        self
    }

    pub fn extensions<'a>(mut self, names: impl IntoIterator<Item = &'a CStr>) -> Self {
        for name in names {
            push_unique(&mut self.extensions, name);
        }
        self
    }

    /// Installs a debug messenger; also enables `VK_EXT_debug_utils`.
    pub fn messenger(mut self, create_info: MessengerCreateInfo) -> Self {
        push_unique(&mut self.extensions, DebugUtils::name());
        self.messenger = Some(create_info);
        self
    }

    pub fn build(self) -> anyhow::Result<Instance> {
        let entry = unsafe { ash::Entry::load() }.context("Instance::build: loading Vulkan")?;

        if !self.layers.is_empty() {
            let available = entry
                .enumerate_instance_layer_properties()
                .context("vkEnumerateInstanceLayerProperties")?;
            let available: Vec<&CStr> = available
                .iter()
                .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
                .collect();
            let missing = missing_names(&self.layers, &available);
            if !missing.is_empty() {
                return Err(Error::MissingLayers(missing).into());
            }
        }

        let layer_names: Vec<_> = self.layers.iter().map(|name| name.as_ptr()).collect();
        let extension_names: Vec<_> = self.extensions.iter().map(|name| name.as_ptr()).collect();
        let application_info = vk::ApplicationInfo::builder()
            .application_name(&self.application_name)
            .application_version(self.application_version)
            .engine_name(&self.engine_name)
            .engine_version(self.engine_version)
            .api_version(self.api_version);
        let handle = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&application_info)
                    .enabled_layer_names(&layer_names)
                    .enabled_extension_names(&extension_names),
                None,
            )
        }
        .context("Instance::build: vkCreateInstance")?;
        tracing::debug!("Created instance {:?}", handle.handle());

        let mut instance = Instance {
            entry,
            handle,
            enabled_layers: self.layers,
            enabled_extensions: self.extensions,
            messenger: None,
        };
        if let Some(create_info) = &self.messenger {
            instance.messenger = Some(
                Messenger::new(&instance.entry, &instance.handle, create_info)
                    .context("Instance::build")?,
            );
        }
        Ok(instance)
    }
}

fn push_unique(names: &mut Vec<CString>, name: &CStr) {
    if !names.iter().any(|existing| existing.as_c_str() == name) {
        names.push(name.to_owned());
    }
}

fn missing_names(requested: &[CString], available: &[&CStr]) -> Vec<String> {
    requested
        .iter()
        .filter(|name| !available.contains(&name.as_c_str()))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messenger_enables_debug_utils_once() {
        let builder = Instance::builder()
            .extension(DebugUtils::name())
            .messenger(MessengerCreateInfo::default());
        assert_eq!(builder.extensions, [DebugUtils::name().to_owned()]);
        assert!(builder.messenger.is_some());
    }

    #[test]
    fn layers_are_deduplicated_in_order() {
        let builder = Instance::builder().layers([
            c"VK_LAYER_KHRONOS_validation",
            c"VK_LAYER_LUNARG_monitor",
            c"VK_LAYER_KHRONOS_validation",
        ]);
        assert_eq!(
            builder.layers,
            [
                c"VK_LAYER_KHRONOS_validation".to_owned(),
                c"VK_LAYER_LUNARG_monitor".to_owned()
            ]
        );
    }

    #[test]
    fn reports_missing_layers_by_name() {
        let requested = [
            c"VK_LAYER_KHRONOS_validation".to_owned(),
            c"VK_LAYER_missing".to_owned(),
        ];
        let available = [c"VK_LAYER_KHRONOS_validation"];
        assert_eq!(missing_names(&requested, &available), ["VK_LAYER_missing"]);
    }

    #[test]
    fn rejects_interior_nul_in_application_name() {
        assert!(Instance::builder().application_name("bad\0name").is_err());
    }
}
