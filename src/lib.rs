//! Thin RAII builders over `ash`.
//!
//! The [`context::Context`] owns the logical device through an `Arc`; every
//! other object is created from a builder that takes `&Arc<Device>`, keeps a
//! `Weak` back-reference, and destroys its handle on drop.
//!
//! Device selection, queue family matching, swapchain negotiation and memory
//! type selection only talk to the driver through [`PhysicalDeviceQueries`]
//! and [`SurfaceQueries`], so they can be exercised without a GPU.

pub mod buffer;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod format;
pub mod image;
pub mod instance;
pub mod memory;
pub mod messenger;
pub mod physical_device;
pub mod pipeline;
pub mod query;
pub mod queue_family;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use ash;
pub use config::Configuration;
pub use context::Context;
pub use error::Error;
pub use physical_device::PhysicalDeviceQueries;
pub use surface::SurfaceQueries;
