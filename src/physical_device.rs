//! Physical device enumeration and selection.
//!
//! [`PhysicalDevice`] is a by-value snapshot of everything the selection
//! logic looks at. [`PhysicalDeviceBuilder::select`] walks the enumerated
//! devices in order, applies the caller's filter, then the queue family
//! matcher, and stops at the first device that passes both.

use std::{
    collections::BTreeSet,
    ffi::{CStr, CString},
    fmt,
};

use anyhow::Context;
use ash::vk;

use crate::{
    error::Error,
    instance::Instance,
    queue_family::{QueueFamilyMatch, QueueType},
    surface::{Surface, SurfaceQueries},
};

/// Driver queries needed to enumerate and describe physical devices.
pub trait PhysicalDeviceQueries {
    fn physical_devices(&self) -> anyhow::Result<Vec<vk::PhysicalDevice>>;
    fn properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn features(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;
    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;
    fn extension_names(&self, physical_device: vk::PhysicalDevice)
        -> anyhow::Result<Vec<CString>>;
    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties;
}

#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub extensions: Vec<CString>,
}

impl PhysicalDevice {
    pub fn query<Q>(queries: &Q, handle: vk::PhysicalDevice) -> anyhow::Result<Self>
    where
        Q: PhysicalDeviceQueries + ?Sized,
    {
        let properties = queries.properties(handle);
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            handle,
            name,
            properties,
            features: queries.features(handle),
            queue_families: queries.queue_family_properties(handle),
            memory_properties: queries.memory_properties(handle),
            extensions: queries.extension_names(handle)?,
        })
    }

    pub fn supports_extensions(&self, names: &[CString]) -> bool {
        names.iter().all(|name| self.extensions.contains(name))
    }

    pub fn is_discrete(&self) -> bool {
        self.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}

/// Filter that accepts devices exposing every required extension.
pub fn supports_required_extensions(
    _index: usize,
    physical_device: &PhysicalDevice,
    required_extensions: &[CString],
) -> bool {
    physical_device.supports_extensions(required_extensions)
}

/// Filter that accepts devices with sampler anisotropy.
pub fn supports_sampler_anisotropy(
    _index: usize,
    physical_device: &PhysicalDevice,
    _required_extensions: &[CString],
) -> bool {
    physical_device.features.sampler_anisotropy == vk::TRUE
}

/// Filter that accepts discrete GPUs only.
pub fn is_discrete_gpu(
    _index: usize,
    physical_device: &PhysicalDevice,
    _required_extensions: &[CString],
) -> bool {
    physical_device.is_discrete()
}

pub type FilterFn = Box<dyn Fn(usize, &PhysicalDevice, &[CString]) -> bool>;

/// The chosen device together with the queue create infos derived for it.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceSelection {
    /// Position of the device in enumeration order.
    pub index: usize,
    pub physical_device: PhysicalDevice,
    pub required_extensions: Vec<CString>,
    pub queues: QueueFamilyMatch,
}

impl PhysicalDeviceSelection {
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.physical_device.handle
    }
}

pub struct PhysicalDeviceBuilder {
    required_extensions: Vec<CString>,
    filter: Option<FilterFn>,
    queue_types: BTreeSet<QueueType>,
    queue_priorities: Vec<f32>,
}

impl fmt::Debug for PhysicalDeviceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalDeviceBuilder")
            .field("required_extensions", &self.required_extensions)
            .field("filter", &self.filter.is_some())
            .field("queue_types", &self.queue_types)
            .field("queue_priorities", &self.queue_priorities)
            .finish()
    }
}

impl Default for PhysicalDeviceBuilder {
    fn default() -> Self {
        Self {
            required_extensions: Vec::new(),
            filter: None,
            queue_types: BTreeSet::from([QueueType::Graphics]),
            queue_priorities: vec![1.0],
        }
    }
}

impl PhysicalDevice {
    pub fn builder() -> PhysicalDeviceBuilder {
        PhysicalDeviceBuilder::default()
    }
}

impl PhysicalDeviceBuilder {
    pub fn required_extension(mut self, name: &CStr) -> Self {
        self.required_extensions.push(name.to_owned());
        self
    }

    pub fn required_extensions<'a>(mut self, names: impl IntoIterator<Item = &'a CStr>) -> Self {
        self.required_extensions
            .extend(names.into_iter().map(CStr::to_owned));
        self
    }

    /// Replaces the default accept-all filter.
    pub fn filter(
        mut self,
        filter: impl Fn(usize, &PhysicalDevice, &[CString]) -> bool + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn queue_types(mut self, queue_types: impl IntoIterator<Item = QueueType>) -> Self {
        self.queue_types = queue_types.into_iter().collect();
        self
    }

    pub fn queue_priorities(mut self, priorities: impl Into<Vec<f32>>) -> Self {
        self.queue_priorities = priorities.into();
        self
    }

    pub fn build(
        &self,
        instance: &Instance,
        surface: Option<&Surface>,
    ) -> anyhow::Result<PhysicalDeviceSelection> {
        self.select(instance, surface)
    }

    /// Picks the first enumerated device accepted by the filter whose queue
    /// families serve every requested type, plus presentation when `surface`
    /// is given. A device rejected by either check does not end the search.
    pub fn select<Q, S>(
        &self,
        queries: &Q,
        surface: Option<&S>,
    ) -> anyhow::Result<PhysicalDeviceSelection>
    where
        Q: PhysicalDeviceQueries + ?Sized,
        S: SurfaceQueries + ?Sized,
    {
        let handles = queries
            .physical_devices()
            .context("PhysicalDeviceBuilder::select: enumerating devices")?;
        if handles.is_empty() {
            return Err(Error::NoPhysicalDevices.into());
        }

        for (index, handle) in handles.into_iter().enumerate() {
            let physical_device = PhysicalDevice::query(queries, handle).with_context(|| {
                format!("PhysicalDeviceBuilder::select: querying device {index}")
            })?;
            let accepted = self.filter.as_ref().map_or(true, |filter| {
                filter(index, &physical_device, &self.required_extensions)
            });
            if !accepted {
                tracing::debug!("Physical device {index} ({}) rejected by filter", physical_device.name);
                continue;
            }

            let present_support = surface.map(|surface| {
                move |family_index: u32| surface.supports_present(handle, family_index)
            });
            let queues = QueueFamilyMatch::find(
                &physical_device.queue_families,
                &self.queue_types,
                &self.queue_priorities,
                present_support,
            )
            .with_context(|| {
                format!(
                    "PhysicalDeviceBuilder::select: matching queue families of {}",
                    physical_device.name
                )
            })?;
            let Some(queues) = queues else {
                tracing::debug!(
                    "Physical device {index} ({}) lacks required queue families",
                    physical_device.name
                );
                continue;
            };

            tracing::info!("Selected physical device {index} ({})", physical_device.name);
            return Ok(PhysicalDeviceSelection {
                index,
                physical_device,
                required_extensions: self.required_extensions.clone(),
                queues,
            });
        }

        Err(Error::NoSuitablePhysicalDevice.into())
    }
}
