use ash::vk;
use thiserror::Error;

/// Typed failures raised by the wrappers themselves.
///
/// Driver failures are not listed here: they travel as `vk::Result` inside an
/// `anyhow::Error` with call-site context attached. Callers that want to react
/// to one of these variants can `downcast_ref::<Error>()` the returned error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{builder}: required field '{field}' is not set")]
    MissingField {
        builder: &'static str,
        field: &'static str,
    },

    #[error("{0} was dropped while still referenced")]
    Expired(&'static str),

    #[error("failed to find GPUs with Vulkan support")]
    NoPhysicalDevices,

    #[error("failed to find a suitable physical device")]
    NoSuitablePhysicalDevice,

    #[error("failed to find memory type for type bits {type_bits:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("none of the candidate formats {0:?} is supported")]
    NoSupportedFormat(Vec<vk::Format>),

    #[error("swapchain accepts at most 2 distinct queue family indices, got {0:?}")]
    TooManyQueueFamilies(Vec<u32>),

    #[error("missing instance layers: {0:?}")]
    MissingLayers(Vec<String>),

    #[error("unsupported window handle: {0}")]
    UnsupportedWindow(&'static str),

    #[error("validation reported {} error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),
}
