// Vulkan instance and physical device enumeration
//
// The instance is the process-wide entry point: it loads the library, checks
// layer support, optionally attaches the diagnostics messenger, and captures
// a capability snapshot of every physical device exactly once. Device
// selection later runs against these snapshots without touching the driver
// again.

use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use super::debug::{DebugMessenger, DiagnosticSink};
use crate::error::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Optional allocation hook set. Handed to the instance once and threaded
/// through every create and destroy call in the backend; `none()` uses the
/// platform allocator.
#[derive(Clone, Copy, Default)]
pub struct AllocationHooks(Option<vk::AllocationCallbacks>);

impl AllocationHooks {
    pub fn new(callbacks: vk::AllocationCallbacks) -> Self {
        Self(Some(callbacks))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn as_vk(&self) -> Option<&vk::AllocationCallbacks> {
        self.0.as_ref()
    }
}

/// Capability snapshot of one physical device, captured at instance creation.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub extensions: Vec<vk::ExtensionProperties>,
}

impl PhysicalDeviceInfo {
    pub fn name(&self) -> String {
        raw_cstr(&self.properties.device_name).to_string_lossy().into_owned()
    }

    /// True when every requested extension appears in this device's
    /// supported-extension list.
    pub fn supports_extensions(&self, required: &[&CStr]) -> bool {
        required.iter().all(|wanted| {
            self.extensions
                .iter()
                .any(|ext| raw_cstr(&ext.extension_name) == *wanted)
        })
    }
}

pub struct Instance {
    // Declaration order is teardown order: the messenger must go before the
    // instance, the instance before the entry.
    debug: Option<DebugMessenger>,
    instance: ash::Instance,
    _entry: Entry,
    physical_devices: Vec<PhysicalDeviceInfo>,
    hooks: AllocationHooks,
}

impl Instance {
    /// Load the Vulkan library and create an instance.
    ///
    /// When `sink` is provided (and the debug-utils extension is available)
    /// a diagnostics messenger is attached; validation layers are requested
    /// only if the loader actually offers them. `hooks` becomes the
    /// allocator for every driver object created through this instance.
    pub fn new(
        app_name: &str,
        sink: Option<DiagnosticSink>,
        hooks: AllocationHooks,
    ) -> Result<Arc<Self>, RenderError> {
        let entry = unsafe { Entry::load()? };

        let app_name_cstr = CString::new(app_name).map_err(|_| RenderError::InitializationFailed)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = surface_extensions();
        let mut layers: Vec<*const c_char> = Vec::new();

        let want_diagnostics = sink.is_some();
        if want_diagnostics {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            if Self::validation_layer_available(&entry)? {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation layer unavailable, continuing without it");
            }
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, hooks.as_vk())? };

        // Until Self takes ownership, failure paths must destroy the raw
        // instance by hand.
        let debug = match sink {
            Some(sink) => match DebugMessenger::new(&entry, &instance, sink, hooks) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(hooks.as_vk()) };
                    return Err(e);
                }
            },
            None => None,
        };

        let physical_devices = match Self::snapshot_devices(&instance) {
            Ok(devices) => devices,
            Err(e) => {
                drop(debug);
                unsafe { instance.destroy_instance(hooks.as_vk()) };
                return Err(e);
            }
        };
        log::info!("enumerated {} physical device(s)", physical_devices.len());

        Ok(Arc::new(Self {
            debug,
            instance,
            _entry: entry,
            physical_devices,
            hooks,
        }))
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn entry(&self) -> &Entry {
        &self._entry
    }

    pub fn physical_devices(&self) -> &[PhysicalDeviceInfo] {
        &self.physical_devices
    }

    pub fn hooks(&self) -> AllocationHooks {
        self.hooks
    }

    pub fn alloc(&self) -> Option<&vk::AllocationCallbacks> {
        self.hooks.as_vk()
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool, RenderError> {
        let available = entry.enumerate_instance_layer_properties()?;
        Ok(available
            .iter()
            .any(|layer| raw_cstr(&layer.layer_name) == VALIDATION_LAYER))
    }

    fn snapshot_devices(instance: &ash::Instance) -> Result<Vec<PhysicalDeviceInfo>, RenderError> {
        let handles = unsafe { instance.enumerate_physical_devices()? };

        handles
            .into_iter()
            .map(|handle| {
                let extensions =
                    unsafe { instance.enumerate_device_extension_properties(handle)? };
                Ok(PhysicalDeviceInfo {
                    handle,
                    properties: unsafe { instance.get_physical_device_properties(handle) },
                    features: unsafe { instance.get_physical_device_features(handle) },
                    memory_properties: unsafe {
                        instance.get_physical_device_memory_properties(handle)
                    },
                    extensions,
                })
            })
            .collect()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Messenger first, then the instance itself.
        self.debug.take();
        unsafe {
            self.instance.destroy_instance(self.hooks.as_vk());
        }
    }
}

/// Read a driver-reported fixed-size name field as a CStr.
pub(crate) fn raw_cstr(raw: &[c_char]) -> &CStr {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

fn surface_extensions() -> Vec<*const c_char> {
    let mut extensions = vec![ash::extensions::khr::Surface::name().as_ptr()];

    #[cfg(target_os = "linux")]
    {
        extensions.push(ash::extensions::khr::XlibSurface::name().as_ptr());
        extensions.push(ash::extensions::khr::WaylandSurface::name().as_ptr());
    }

    #[cfg(target_os = "windows")]
    {
        extensions.push(ash::extensions::khr::Win32Surface::name().as_ptr());
    }

    extensions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut ext = vk::ExtensionProperties::default();
        for (dst, src) in ext.extension_name.iter_mut().zip(name.to_bytes_with_nul()) {
            *dst = *src as c_char;
        }
        ext
    }

    fn info_with_extensions(extensions: Vec<vk::ExtensionProperties>) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            features: vk::PhysicalDeviceFeatures::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            extensions,
        }
    }

    #[test]
    fn extension_subset_check() {
        let info = info_with_extensions(vec![
            extension(c"VK_KHR_swapchain"),
            extension(c"VK_KHR_maintenance1"),
        ]);

        assert!(info.supports_extensions(&[c"VK_KHR_swapchain"]));
        assert!(info.supports_extensions(&[c"VK_KHR_swapchain", c"VK_KHR_maintenance1"]));
        assert!(!info.supports_extensions(&[c"VK_KHR_ray_tracing_pipeline"]));
    }

    #[test]
    fn empty_requirement_always_satisfied() {
        let info = info_with_extensions(Vec::new());
        assert!(info.supports_extensions(&[]));
    }

    #[test]
    fn hooks_default_to_platform_allocator() {
        assert!(AllocationHooks::none().as_vk().is_none());
        assert!(AllocationHooks::default().as_vk().is_none());
    }

    #[test]
    fn custom_hooks_reach_the_driver_side_struct() {
        let mut user_data = 7u32;
        let callbacks = vk::AllocationCallbacks::builder()
            .user_data(&mut user_data as *mut u32 as *mut std::ffi::c_void)
            .build();

        let hooks = AllocationHooks::new(callbacks);
        let vk_side = hooks.as_vk().unwrap();
        assert_eq!(vk_side.p_user_data, &mut user_data as *mut u32 as *mut _);
    }
}
