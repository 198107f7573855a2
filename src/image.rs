use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
    memory::{memory_type_index, DeviceMemory, MemoryTypeIndexFn},
};

/// A 2D image with its own dedicated memory allocation.
pub struct Image {
    pub handle: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub memory: DeviceMemory,
    device: Weak<Device>,
}

impl Image {
    pub fn builder() -> ImageBuilder {
        ImageBuilder::default()
    }

    pub fn device(&self) -> anyhow::Result<Arc<Device>> {
        device::upgrade(&self.device)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping image {:?}", self.handle);
                unsafe { device.handle.destroy_image(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before image {:?}, leaking it", self.handle),
        }
    }
}

pub struct ImageBuilder {
    device: Option<Weak<Device>>,
    image_type: vk::ImageType,
    format: vk::Format,
    extent: Option<vk::Extent3D>,
    mip_levels: u32,
    array_layers: u32,
    samples: vk::SampleCountFlags,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    queue_family_indices: Vec<u32>,
    memory_properties: vk::MemoryPropertyFlags,
    memory_type_index_fn: MemoryTypeIndexFn,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            device: None,
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: None,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            queue_family_indices: Vec::new(),
            memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            memory_type_index_fn: memory_type_index,
        }
    }
}

impl ImageBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn image_type(mut self, image_type: vk::ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.extent = Some(vk::Extent3D {
            width,
            height,
            depth: 1,
        });
        self
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// Two or more distinct families switch the image to concurrent sharing.
    pub fn queue_family_indices(mut self, indices: impl Into<Vec<u32>>) -> Self {
        self.queue_family_indices = indices.into();
        self
    }

    pub fn memory_properties(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.memory_properties = properties;
        self
    }

    pub fn memory_type_index_fn(mut self, select: MemoryTypeIndexFn) -> Self {
        self.memory_type_index_fn = select;
        self
    }

    pub fn build(self) -> anyhow::Result<Image> {
        let device = device::resolve(&self.device, "Image")?;
        let extent = self.extent.ok_or(Error::MissingField {
            builder: "Image",
            field: "extent",
        })?;
        if self.format == vk::Format::UNDEFINED {
            return Err(Error::MissingField {
                builder: "Image",
                field: "format",
            }
            .into());
        }

        let mut create_info = vk::ImageCreateInfo::builder()
            .image_type(self.image_type)
            .format(self.format)
            .extent(extent)
            .mip_levels(self.mip_levels)
            .array_layers(self.array_layers)
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(self.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let queue_family_indices = distinct_families(&self.queue_family_indices);
        create_info = match sharing_mode(&queue_family_indices) {
            vk::SharingMode::CONCURRENT => create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices),
            sharing_mode => create_info.sharing_mode(sharing_mode),
        };
        let handle = unsafe { device.handle.create_image(&create_info, None) }
            .context("Image::build: vkCreateImage")?;

        let requirements = unsafe { device.handle.get_image_memory_requirements(handle) };
        let memory = DeviceMemory::allocate(
            &device,
            &requirements,
            self.memory_properties,
            self.memory_type_index_fn,
        )
        .and_then(|memory| {
            unsafe { device.handle.bind_image_memory(handle, memory.handle, 0) }
                .context("vkBindImageMemory")?;
            Ok(memory)
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.handle.destroy_image(handle, None) };
                return Err(error.context("Image::build"));
            }
        };
        tracing::debug!(
            "Created image {:?} ({:?}, {}x{})",
            handle,
            self.format,
            extent.width,
            extent.height
        );

        Ok(Image {
            handle,
            format: self.format,
            extent,
            memory,
            device: Arc::downgrade(&device),
        })
    }
}

/// Queue family indices with repeats removed, first occurrences kept.
pub(crate) fn distinct_families(queue_family_indices: &[u32]) -> Vec<u32> {
    let mut distinct = Vec::with_capacity(queue_family_indices.len());
    for &index in queue_family_indices {
        if !distinct.contains(&index) {
            distinct.push(index);
        }
    }
    distinct
}

/// Exclusive for zero or one family, concurrent otherwise. Expects the
/// output of [`distinct_families`].
pub(crate) fn sharing_mode(distinct_families: &[u32]) -> vk::SharingMode {
    if distinct_families.len() > 1 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

pub struct ImageView {
    pub handle: vk::ImageView,
    pub image: vk::Image,
    pub format: vk::Format,
    device: Weak<Device>,
}

impl ImageView {
    pub fn builder() -> ImageViewBuilder {
        ImageViewBuilder::default()
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping image view {:?}", self.handle);
                unsafe { device.handle.destroy_image_view(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before image view {:?}, leaking it", self.handle),
        }
    }
}

pub struct ImageViewBuilder {
    device: Option<Weak<Device>>,
    image: Option<vk::Image>,
    view_type: vk::ImageViewType,
    format: vk::Format,
    subresource_range: vk::ImageSubresourceRange,
}

impl Default for ImageViewBuilder {
    fn default() -> Self {
        Self {
            device: None,
            image: None,
            view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
        }
    }
}

impl ImageViewBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn image(mut self, image: vk::Image) -> Self {
        self.image = Some(image);
        self
    }

    pub fn view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = view_type;
        self
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn aspect_mask(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.subresource_range.aspect_mask = aspect_mask;
        self
    }

    pub fn subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.subresource_range = range;
        self
    }

    pub fn build(self) -> anyhow::Result<ImageView> {
        let device = device::resolve(&self.device, "ImageView")?;
        let image = self.image.ok_or(Error::MissingField {
            builder: "ImageView",
            field: "image",
        })?;
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(self.view_type)
            .format(self.format)
            .subresource_range(self.subresource_range);
        let handle = unsafe { device.handle.create_image_view(&create_info, None) }
            .context("ImageView::build: vkCreateImageView")?;
        tracing::debug!("Created image view {:?} for image {:?}", handle, image);
        Ok(ImageView {
            handle,
            image,
            format: self.format,
            device: Arc::downgrade(&device),
        })
    }
}

pub struct Sampler {
    pub handle: vk::Sampler,
    device: Weak<Device>,
}

impl Sampler {
    pub fn builder() -> SamplerBuilder {
        SamplerBuilder::default()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping sampler {:?}", self.handle);
                unsafe { device.handle.destroy_sampler(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before sampler {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Default)]
pub struct SamplerBuilder {
    device: Option<Weak<Device>>,
    filter: Option<vk::Filter>,
    address_mode: Option<vk::SamplerAddressMode>,
    max_anisotropy: Option<f32>,
    max_lod: f32,
}

impl SamplerBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    /// Used for both magnification and minification. Defaults to linear.
    pub fn filter(mut self, filter: vk::Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Used for U, V and W. Defaults to repeat.
    pub fn address_mode(mut self, address_mode: vk::SamplerAddressMode) -> Self {
        self.address_mode = Some(address_mode);
        self
    }

    /// Requires the `sampler_anisotropy` device feature.
    pub fn max_anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.max_anisotropy = Some(max_anisotropy);
        self
    }

    pub fn max_lod(mut self, max_lod: f32) -> Self {
        self.max_lod = max_lod;
        self
    }

    pub fn build(self) -> anyhow::Result<Sampler> {
        let device = device::resolve(&self.device, "Sampler")?;
        let filter = self.filter.unwrap_or(vk::Filter::LINEAR);
        let address_mode = self.address_mode.unwrap_or(vk::SamplerAddressMode::REPEAT);
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(self.max_anisotropy.is_some())
            .max_anisotropy(self.max_anisotropy.unwrap_or(1.0))
            .compare_op(vk::CompareOp::ALWAYS)
            .max_lod(self.max_lod)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
        let handle = unsafe { device.handle.create_sampler(&create_info, None) }
            .context("Sampler::build: vkCreateSampler")?;
        tracing::debug!("Created sampler {:?}", handle);
        Ok(Sampler {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharing_mode_counts_distinct_families() {
        assert_eq!(sharing_mode(&distinct_families(&[])), vk::SharingMode::EXCLUSIVE);
        assert_eq!(sharing_mode(&distinct_families(&[3, 3])), vk::SharingMode::EXCLUSIVE);
        assert_eq!(sharing_mode(&distinct_families(&[0, 1])), vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn repeated_families_reach_the_driver_once() {
        let queue_family_indices = distinct_families(&[0, 0, 1]);
        assert_eq!(queue_family_indices, [0, 1]);
        assert_eq!(sharing_mode(&queue_family_indices), vk::SharingMode::CONCURRENT);

        let create_info = vk::BufferCreateInfo::builder()
            .sharing_mode(sharing_mode(&queue_family_indices))
            .queue_family_indices(&queue_family_indices);
        assert_eq!(create_info.queue_family_index_count, 2);
    }

    #[test]
    fn image_requires_device_first() {
        let error = Image::builder().extent(4, 4).build().err().unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::MissingField {
                builder: "Image",
                field: "device"
            })
        ));
    }

    #[test]
    fn dropped_device_is_reported_as_expired() {
        let builder = ImageView::builder();
        let builder = ImageViewBuilder {
            device: Some(Weak::new()),
            ..builder
        };
        let error = builder.build().err().unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::Expired("Device"))
        ));
    }
}
