// Presentable surface
//
// Binds the native window to a VkSurfaceKHR. Creation branches on the raw
// window handle type (Xlib/Wayland on Linux, Win32 on Windows); the wrapper
// keeps the instance alive so destruction ordering holds.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::instance::Instance;
use crate::error::RenderError;

pub struct Surface {
    surface: vk::SurfaceKHR,
    loader: ash::extensions::khr::Surface,
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new(
        instance: Arc<Instance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self, RenderError> {
        let surface = create_platform_surface(&instance, display_handle, window_handle)?;
        let loader = ash::extensions::khr::Surface::new(instance.entry(), instance.raw());

        Ok(Self {
            surface,
            loader,
            instance,
        })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn loader(&self) -> &ash::extensions::khr::Surface {
        &self.loader
    }

    /// Whether the given queue family of `device` can present to this surface.
    pub fn supports_queue_family(
        &self,
        device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool, RenderError> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(device, queue_family, self.surface)?
        };
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_surface(self.surface, self.instance.alloc());
        }
    }
}

#[cfg(target_os = "linux")]
fn create_platform_surface(
    instance: &Instance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR, RenderError> {
    match (display_handle, window_handle) {
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut _)
                .window(window.window);
            let loader =
                ash::extensions::khr::XlibSurface::new(instance.entry(), instance.raw());
            Ok(unsafe { loader.create_xlib_surface(&create_info, instance.alloc())? })
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            let loader =
                ash::extensions::khr::WaylandSurface::new(instance.entry(), instance.raw());
            Ok(unsafe { loader.create_wayland_surface(&create_info, instance.alloc())? })
        }
        _ => {
            log::error!("unsupported window handle type for this platform");
            Err(RenderError::InitializationFailed)
        }
    }
}

#[cfg(target_os = "windows")]
fn create_platform_surface(
    instance: &Instance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR, RenderError> {
    match (display_handle, window_handle) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
            let hinstance = window
                .hinstance
                .map(|h| h.get())
                .unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = window.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            let loader =
                ash::extensions::khr::Win32Surface::new(instance.entry(), instance.raw());
            Ok(unsafe { loader.create_win32_surface(&create_info, instance.alloc())? })
        }
        _ => {
            log::error!("unsupported window handle type for this platform");
            Err(RenderError::InitializationFailed)
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn create_platform_surface(
    _instance: &Instance,
    _display_handle: RawDisplayHandle,
    _window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR, RenderError> {
    log::error!("no surface backend for this platform");
    Err(RenderError::InitializationFailed)
}
