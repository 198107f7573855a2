//! Swapchain creation and the parameter negotiation behind it.

use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::{extensions::khr, vk};

use crate::{
    device::{self, Device},
    error::Error,
    image::{self, ImageView},
    surface::{Surface, SurfaceQueries},
};

const PREFERRED_IMAGE_COUNT: u32 = 3;

/// Everything the swapchain create info needs that depends on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainParameters {
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainParameters {
    pub fn negotiate(
        capabilities: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let surface_format = surface_format(formats)?;
        Ok(Self {
            min_image_count: image_count(capabilities),
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: present_mode(present_modes),
            extent: extent(capabilities, width, height),
            pre_transform: pre_transform(capabilities),
            composite_alpha: composite_alpha(capabilities.supported_composite_alpha),
        })
    }

    /// Queries the surface as seen from `physical_device` and negotiates.
    pub fn query<S>(
        surface: &S,
        physical_device: vk::PhysicalDevice,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self>
    where
        S: SurfaceQueries + ?Sized,
    {
        let capabilities = surface.capabilities(physical_device)?;
        let formats = surface.formats(physical_device)?;
        let present_modes = surface.present_modes(physical_device)?;
        Self::negotiate(&capabilities, &formats, &present_modes, width, height)
    }
}

fn surface_format(formats: &[vk::SurfaceFormatKHR]) -> anyhow::Result<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(Error::NoSurfaceFormats.into()),
        [only] if only.format == vk::Format::UNDEFINED => Ok(*only),
        [first, ..] => Ok(formats
            .iter()
            .copied()
            .find(|surface_format| {
                surface_format.format == vk::Format::B8G8R8A8_SRGB
                    && surface_format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(*first)),
    }
}

fn present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: width.clamp(min.width, max.width.max(min.width)),
        height: height.clamp(min.height, max.height.max(min.height)),
    }
}

fn pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

fn composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|flag| supported.contains(*flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count.max(PREFERRED_IMAGE_COUNT);
    match capabilities.max_image_count {
        0 => count,
        max if max < count => max.max(capabilities.min_image_count),
        _ => count,
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub functions: khr::Swapchain,
    pub parameters: SwapchainParameters,
    pub images: Vec<vk::Image>,
    pub queue_family_indices: Vec<u32>,
    pub image_usage: vk::ImageUsageFlags,
    surface: Arc<Surface>,
    device: Weak<Device>,
}

impl Swapchain {
    pub fn builder() -> SwapchainBuilder {
        SwapchainBuilder::default()
    }

    pub fn device(&self) -> anyhow::Result<Arc<Device>> {
        device::upgrade(&self.device)
    }

    /// Replaces the swapchain for a new framebuffer size, handing the current
    /// one to the driver as `old_swapchain`.
    pub fn recreate(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        let device = self.device()?;
        let parameters =
            SwapchainParameters::query(self.surface.as_ref(), device.physical_device(), width, height)
                .context("Swapchain::recreate")?;
        let handle = create(
            &self.functions,
            self.surface.handle,
            &parameters,
            self.image_usage,
            &self.queue_family_indices,
            self.handle,
        )
        .context("Swapchain::recreate")?;
        unsafe { self.functions.destroy_swapchain(self.handle, None) };
        tracing::debug!("Recreated swapchain {:?} -> {:?}", self.handle, handle);
        self.handle = handle;
        self.parameters = parameters;
        self.images = unsafe { self.functions.get_swapchain_images(handle) }
            .context("vkGetSwapchainImagesKHR")?;
        Ok(())
    }

    /// One color view per swapchain image.
    pub fn create_image_views(&self) -> anyhow::Result<Vec<ImageView>> {
        let device = self.device()?;
        self.images
            .iter()
            .map(|&image| {
                ImageView::builder()
                    .device(&device)
                    .image(image)
                    .format(self.parameters.format)
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .build()
            })
            .collect()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(_device) => {
                tracing::debug!("Dropping swapchain {:?}", self.handle);
                unsafe { self.functions.destroy_swapchain(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before swapchain {:?}, leaking it", self.handle),
        }
    }
}

fn create(
    functions: &khr::Swapchain,
    surface: vk::SurfaceKHR,
    parameters: &SwapchainParameters,
    image_usage: vk::ImageUsageFlags,
    queue_family_indices: &[u32],
    old_swapchain: vk::SwapchainKHR,
) -> anyhow::Result<vk::SwapchainKHR> {
    let sharing_mode = sharing_mode(queue_family_indices);
    let mut create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(parameters.min_image_count)
        .image_format(parameters.format)
        .image_color_space(parameters.color_space)
        .image_extent(parameters.extent)
        .image_array_layers(1)
        .image_usage(image_usage)
        .image_sharing_mode(sharing_mode)
        .pre_transform(parameters.pre_transform)
        .composite_alpha(parameters.composite_alpha)
        .present_mode(parameters.present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);
    if sharing_mode == vk::SharingMode::CONCURRENT {
        create_info = create_info.queue_family_indices(queue_family_indices);
    }
    unsafe { functions.create_swapchain(&create_info, None) }.context("vkCreateSwapchainKHR")
}

fn sharing_mode(queue_family_indices: &[u32]) -> vk::SharingMode {
    if queue_family_indices.len() == 2 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

/// Deduplicates `indices` keeping first occurrences; more than two distinct
/// families cannot share swapchain images.
fn distinct_queue_families(indices: &[u32]) -> anyhow::Result<Vec<u32>> {
    let distinct = image::distinct_families(indices);
    if distinct.len() > 2 {
        return Err(Error::TooManyQueueFamilies(distinct).into());
    }
    Ok(distinct)
}

pub struct SwapchainBuilder {
    device: Option<Weak<Device>>,
    surface: Option<Arc<Surface>>,
    width: u32,
    height: u32,
    queue_family_indices: Vec<u32>,
    image_usage: vk::ImageUsageFlags,
}

impl Default for SwapchainBuilder {
    fn default() -> Self {
        Self {
            device: None,
            surface: None,
            width: 0,
            height: 0,
            queue_family_indices: Vec::new(),
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

impl SwapchainBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn surface(mut self, surface: &Arc<Surface>) -> Self {
        self.surface = Some(surface.clone());
        self
    }

    /// Framebuffer size, used when the surface leaves the extent to us.
    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Families that access the images, typically graphics and present.
    pub fn queue_family_indices(mut self, indices: impl Into<Vec<u32>>) -> Self {
        self.queue_family_indices = indices.into();
        self
    }

    pub fn image_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.image_usage = usage;
        self
    }

    pub fn build(self) -> anyhow::Result<Swapchain> {
        let device = device::resolve(&self.device, "Swapchain")?;
        let surface = self.surface.ok_or(Error::MissingField {
            builder: "Swapchain",
            field: "surface",
        })?;
        let queue_family_indices =
            distinct_queue_families(&self.queue_family_indices).context("Swapchain::build")?;
        let parameters = SwapchainParameters::query(
            surface.as_ref(),
            device.physical_device(),
            self.width,
            self.height,
        )
        .context("Swapchain::build")?;

        let functions = khr::Swapchain::new(&device.instance.handle, &device.handle);
        let handle = create(
            &functions,
            surface.handle,
            &parameters,
            self.image_usage,
            &queue_family_indices,
            vk::SwapchainKHR::null(),
        )
        .context("Swapchain::build")?;
        let images = unsafe { functions.get_swapchain_images(handle) }
            .context("vkGetSwapchainImagesKHR")?;
        tracing::debug!(
            "Created swapchain {:?}: {} images, {:?}, {:?}, {}x{}",
            handle,
            images.len(),
            parameters.format,
            parameters.present_mode,
            parameters.extent.width,
            parameters.extent.height
        );

        Ok(Swapchain {
            handle,
            functions,
            parameters,
            images,
            queue_family_indices,
            image_usage: self.image_usage,
            surface,
            device: Arc::downgrade(&device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_srgb_pair_over_first_format() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let parameters =
            SwapchainParameters::negotiate(&capabilities(), &formats, &[], 0, 0).unwrap();
        assert_eq!(parameters.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(parameters.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let parameters =
            SwapchainParameters::negotiate(&capabilities(), &formats, &[], 0, 0).unwrap();
        assert_eq!(parameters.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn accepts_single_undefined_format() {
        let formats = [surface_format(vk::Format::UNDEFINED)];
        let parameters =
            SwapchainParameters::negotiate(&capabilities(), &formats, &[], 0, 0).unwrap();
        assert_eq!(parameters.format, vk::Format::UNDEFINED);
    }

    #[test]
    fn no_formats_is_an_error() {
        let error = SwapchainParameters::negotiate(&capabilities(), &[], &[], 0, 0).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::NoSurfaceFormats)
        ));
    }

    #[test]
    fn mailbox_only_when_listed() {
        assert_eq!(
            present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn current_extent_is_used_verbatim() {
        let extent = extent(&capabilities(), 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_request() {
        let mut capabilities = capabilities();
        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let clamped = extent(&capabilities, 10_000, 0);
        assert_eq!((clamped.width, clamped.height), (4096, 1));
        let inside = extent(&capabilities, 1024, 768);
        assert_eq!((inside.width, inside.height), (1024, 768));
    }

    #[test]
    fn identity_transform_when_supported() {
        let mut capabilities = capabilities();
        capabilities.supported_transforms =
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        capabilities.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            pre_transform(&capabilities),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );

        capabilities.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            pre_transform(&capabilities),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );
    }

    #[test]
    fn composite_alpha_preference_order() {
        use vk::CompositeAlphaFlagsKHR as Alpha;
        assert_eq!(composite_alpha(Alpha::OPAQUE | Alpha::INHERIT), Alpha::INHERIT);
        assert_eq!(
            composite_alpha(Alpha::POST_MULTIPLIED | Alpha::PRE_MULTIPLIED),
            Alpha::PRE_MULTIPLIED
        );
        assert_eq!(composite_alpha(Alpha::empty()), Alpha::OPAQUE);
    }

    #[test]
    fn image_count_targets_three_within_limits() {
        let mut capabilities = capabilities();
        assert_eq!(image_count(&capabilities), 3);

        capabilities.max_image_count = 0;
        assert_eq!(image_count(&capabilities), 3);

        capabilities.max_image_count = 2;
        assert_eq!(image_count(&capabilities), 2);

        capabilities.min_image_count = 4;
        capabilities.max_image_count = 0;
        assert_eq!(image_count(&capabilities), 4);
    }

    #[test]
    fn two_distinct_families_share_concurrently() {
        let indices = distinct_queue_families(&[0, 2, 0]).unwrap();
        assert_eq!(indices, [0, 2]);
        assert_eq!(sharing_mode(&indices), vk::SharingMode::CONCURRENT);

        let indices = distinct_queue_families(&[1, 1]).unwrap();
        assert_eq!(sharing_mode(&indices), vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn third_distinct_family_is_rejected() {
        let error = distinct_queue_families(&[0, 1, 2]).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::TooManyQueueFamilies(indices)) if indices == &[0, 1, 2]
        ));
    }

    #[test]
    fn build_without_device_names_missing_field() {
        let error = Swapchain::builder().build().err().unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::MissingField {
                builder: "Swapchain",
                field: "device"
            })
        ));
    }
}
