use std::ffi::CString;

use ash::vk;

use crate::{messenger::Severity, queue_family::QueueType};

pub const VALIDATION_LAYER: &std::ffi::CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything [`Context`](crate::context::Context) needs to bootstrap an
/// instance and a device.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub api_version: u32,
    /// Enables the layers below and a debug messenger.
    pub validation: bool,
    pub validation_layers: Vec<CString>,
    /// Messenger severity forwarded to `tracing`.
    pub log_severity: Severity,
    /// Messenger severity reported by `Messenger::check`; `None` only logs.
    pub error_severity: Option<Severity>,
    pub device_extensions: Vec<CString>,
    pub queue_types: Vec<QueueType>,
    pub queue_priorities: Vec<f32>,
    pub sampler_anisotropy: bool,
    pub dynamic_rendering: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            application_name: "vulkan-raii".into(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            engine_name: "vulkan-raii".into(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_3,
            validation: cfg!(debug_assertions),
            validation_layers: vec![VALIDATION_LAYER.to_owned()],
            log_severity: Severity::Warning,
            error_severity: Some(Severity::Error),
            device_extensions: Vec::new(),
            queue_types: vec![QueueType::Graphics],
            queue_priorities: vec![1.0],
            sampler_anisotropy: false,
            dynamic_rendering: false,
        }
    }
}
