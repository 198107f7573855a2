//! One-call bootstrap of instance, surface and device from a [`Configuration`].

use std::{
    ffi::{CStr, CString},
    sync::Arc,
};

use anyhow::Context as _;
use ash::{extensions::khr, vk};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::{
    config::Configuration,
    device::Device,
    instance::{Instance, InstanceBuilder},
    messenger::MessengerCreateInfo,
    physical_device::{PhysicalDevice, PhysicalDeviceBuilder},
    surface::{Surface, SurfaceQueries},
};

/// Owns the device; every other object holds it weakly.
///
/// Fields drop in declaration order, so the device goes before the surface
/// and both before the instance.
pub struct Context {
    pub device: Arc<Device>,
    pub surface: Option<Arc<Surface>>,
    pub instance: Arc<Instance>,
}

impl Context {
    pub fn headless(config: &Configuration) -> anyhow::Result<Self> {
        let instance = Arc::new(
            instance_builder(config)?
                .build()
                .context("Context::headless")?,
        );
        let device = Arc::new(create_device(config, &instance, None).context("Context::headless")?);
        Ok(Self {
            device,
            surface: None,
            instance,
        })
    }

    pub fn with_window(
        config: &Configuration,
        window: &(impl HasWindowHandle + HasDisplayHandle),
    ) -> anyhow::Result<Self> {
        let display = window.display_handle()?.as_raw();
        let instance = Arc::new(
            instance_builder(config)?
                .extensions(Surface::required_extensions(display)?)
                .build()
                .context("Context::with_window")?,
        );
        let surface = Arc::new(Surface::new(window, &instance).context("Context::with_window")?);
        let device = Arc::new(
            create_device(config, &instance, Some(&surface)).context("Context::with_window")?,
        );
        Ok(Self {
            device,
            surface: Some(surface),
            instance,
        })
    }

    /// Reports validation errors recorded since the last call.
    pub fn check_validation(&self) -> anyhow::Result<()> {
        match &self.instance.messenger {
            Some(messenger) => messenger.check(),
            None => Ok(()),
        }
    }
}

fn instance_builder(config: &Configuration) -> anyhow::Result<InstanceBuilder> {
    let mut builder = Instance::builder()
        .application_name(&config.application_name)?
        .application_version(config.application_version)
        .engine_name(&config.engine_name)?
        .engine_version(config.engine_version)
        .api_version(config.api_version);
    if config.validation {
        builder = builder
            .layers(config.validation_layers.iter().map(CString::as_c_str))
            .messenger(MessengerCreateInfo {
                min_severity: config.log_severity,
                error_severity: config.error_severity,
                ..Default::default()
            });
    }
    Ok(builder)
}

/// Device requirements derived from `config`, as a physical device builder.
pub fn physical_device_builder(
    config: &Configuration,
    surface: Option<&Arc<Surface>>,
) -> PhysicalDeviceBuilder {
    let mut extensions: Vec<&CStr> = config
        .device_extensions
        .iter()
        .map(CString::as_c_str)
        .collect();
    if surface.is_some() {
        extensions.push(khr::Swapchain::name());
    }
    let sampler_anisotropy = config.sampler_anisotropy;
    let surface = surface.cloned();
    PhysicalDevice::builder()
        .required_extensions(extensions)
        .queue_types(config.queue_types.iter().copied())
        .queue_priorities(config.queue_priorities.clone())
        .filter(move |index, physical_device, required_extensions| {
            let accepted = physical_device.supports_extensions(required_extensions)
                && (!sampler_anisotropy || physical_device.features.sampler_anisotropy == vk::TRUE)
                && surface
                    .as_deref()
                    .map_or(true, |surface| presents_anything(surface, physical_device));
            if !accepted {
                tracing::debug!("Physical device {index} ({}) does not meet requirements", physical_device.name);
            }
            accepted
        })
}

/// At least one surface format and present mode.
fn presents_anything<S>(surface: &S, physical_device: &PhysicalDevice) -> bool
where
    S: SurfaceQueries + ?Sized,
{
    let formats = surface.formats(physical_device.handle);
    let present_modes = surface.present_modes(physical_device.handle);
    matches!((formats, present_modes), (Ok(formats), Ok(modes)) if !formats.is_empty() && !modes.is_empty())
}

fn create_device(
    config: &Configuration,
    instance: &Arc<Instance>,
    surface: Option<&Arc<Surface>>,
) -> anyhow::Result<Device> {
    let selection = physical_device_builder(config, surface)
        .build(instance, surface.map(Arc::as_ref))
        .context("selecting physical device")?;
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: config.sampler_anisotropy.into(),
        ..Default::default()
    };
    let mut builder = Device::builder()
        .instance(instance)
        .physical_device(selection)
        .features(features)
        .dynamic_rendering(config.dynamic_rendering);
    if config.validation {
        builder = builder.layers(config.validation_layers.iter().map(CString::as_c_str));
    }
    builder.build()
}
