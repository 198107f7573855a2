use std::{
    ffi::{c_void, CStr},
    ptr,
    sync::Arc,
};

use anyhow::Context;
use ash::{extensions::khr, vk};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::{error::Error, instance::Instance};

/// Driver queries about a surface, as seen from one physical device.
pub trait SurfaceQueries {
    fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> anyhow::Result<bool>;
    fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<vk::SurfaceCapabilitiesKHR>;
    fn formats(&self, physical_device: vk::PhysicalDevice)
        -> anyhow::Result<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::PresentModeKHR>>;
}

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub functions: khr::Surface,
    pub instance: Arc<Instance>,
}

impl Surface {
    /// Creates a surface for `window` on the platforms `raw-window-handle`
    /// reports as Win32, Xlib, Xcb or Wayland.
    pub fn new(
        window: &(impl HasWindowHandle + HasDisplayHandle),
        instance: &Arc<Instance>,
    ) -> anyhow::Result<Self> {
        let window_handle = window.window_handle()?.as_raw();
        let display_handle = window.display_handle()?.as_raw();
        let (entry, handle) = (&instance.entry, &instance.handle);
        let surface = match (window_handle, display_handle) {
            (RawWindowHandle::Win32(window_handle), _) => {
                let hinstance = window_handle.hinstance.map_or(0, |hinstance| hinstance.get());
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance as *const c_void)
                    .hwnd(window_handle.hwnd.get() as *const c_void);
                unsafe {
                    khr::Win32Surface::new(entry, handle).create_win32_surface(&create_info, None)
                }
                .context("vkCreateWin32SurfaceKHR")?
            }
            (RawWindowHandle::Xlib(window_handle), RawDisplayHandle::Xlib(display_handle)) => {
                let display = display_handle
                    .display
                    .map_or(ptr::null_mut(), |display| display.as_ptr());
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(display as *mut _)
                    .window(window_handle.window);
                unsafe {
                    khr::XlibSurface::new(entry, handle).create_xlib_surface(&create_info, None)
                }
                .context("vkCreateXlibSurfaceKHR")?
            }
            (RawWindowHandle::Xcb(window_handle), RawDisplayHandle::Xcb(display_handle)) => {
                let connection = display_handle
                    .connection
                    .map_or(ptr::null_mut(), |connection| connection.as_ptr());
                let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection as *mut _)
                    .window(window_handle.window.get());
                unsafe { khr::XcbSurface::new(entry, handle).create_xcb_surface(&create_info, None) }
                    .context("vkCreateXcbSurfaceKHR")?
            }
            (
                RawWindowHandle::Wayland(window_handle),
                RawDisplayHandle::Wayland(display_handle),
            ) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display_handle.display.as_ptr())
                    .surface(window_handle.surface.as_ptr());
                unsafe {
                    khr::WaylandSurface::new(entry, handle)
                        .create_wayland_surface(&create_info, None)
                }
                .context("vkCreateWaylandSurfaceKHR")?
            }
            _ => return Err(Error::UnsupportedWindow("window system has no surface support here").into()),
        };
        Ok(Self::from_raw(surface, instance))
    }

    /// Takes ownership of a surface created elsewhere, e.g. by a windowing
    /// library.
    pub fn from_raw(handle: vk::SurfaceKHR, instance: &Arc<Instance>) -> Self {
        tracing::debug!("Created surface {:?}", handle);
        let functions = khr::Surface::new(&instance.entry, &instance.handle);
        Self {
            handle,
            functions,
            instance: instance.clone(),
        }
    }

    /// Instance extensions needed to create a surface for `display`.
    pub fn required_extensions(
        display: RawDisplayHandle,
    ) -> anyhow::Result<Vec<&'static CStr>> {
        let platform = match display {
            RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
            RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
            RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
            RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
            _ => return Err(Error::UnsupportedWindow("display system has no surface extension here").into()),
        };
        Ok(vec![khr::Surface::name(), platform])
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        unsafe { self.functions.destroy_surface(self.handle, None) };
    }
}

impl SurfaceQueries for Surface {
    fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> anyhow::Result<bool> {
        unsafe {
            self.functions.get_physical_device_surface_support(
                physical_device,
                family_index,
                self.handle,
            )
        }
        .context("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.functions
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.functions
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .context("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.functions
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .context("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle};

    use super::*;

    #[test]
    fn windows_needs_win32_surface() {
        let extensions =
            Surface::required_extensions(RawDisplayHandle::Windows(WindowsDisplayHandle::new()))
                .unwrap();
        assert_eq!(extensions, [khr::Surface::name(), khr::Win32Surface::name()]);
    }

    #[test]
    fn wayland_needs_wayland_surface() {
        let mut display = 0u8;
        let display = NonNull::from(&mut display).cast::<c_void>();
        let extensions =
            Surface::required_extensions(RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display)))
                .unwrap();
        assert_eq!(extensions, [khr::Surface::name(), khr::WaylandSurface::name()]);
    }
}
