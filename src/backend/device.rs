// Logical device and queue
//
// Physical device selection is first-fit over the instance's capability
// snapshots: a caller predicate, a required-extension subset check, and the
// surface checks (non-empty format/present-mode lists plus a queue family
// that is both graphics- and present-capable). No scoring. The winning
// family yields exactly one combined queue; dedicated transfer/present
// queues are not modelled.

use ash::vk;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;

use super::instance::{AllocationHooks, Instance, PhysicalDeviceInfo};
use super::surface::Surface;
use super::swapchain::SwapchainSupport;
use crate::error::RenderError;

pub struct Device {
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    physical: PhysicalDeviceInfo,
    hooks: AllocationHooks,
    instance: Arc<Instance>,
}

impl Device {
    /// Select a physical device and create the logical device with its one
    /// queue. `selector` filters on the capability snapshot; `extensions`
    /// must all be supported by the winning device and are enabled on it.
    pub fn new(
        instance: Arc<Instance>,
        surface: &Surface,
        selector: impl Fn(&PhysicalDeviceInfo) -> bool,
        extensions: &[&CStr],
    ) -> Result<Arc<Self>, RenderError> {
        let (physical, queue_family) =
            select_physical_device(instance.physical_devices(), &selector, extensions, |info| {
                presentable_queue_family(instance.raw(), surface, info)
            })?;
        let physical = physical.clone();

        Self::from_parts(instance, physical, queue_family, extensions)
    }

    fn from_parts(
        instance: Arc<Instance>,
        physical: PhysicalDeviceInfo,
        queue_family: u32,
        extensions: &[&CStr],
    ) -> Result<Arc<Self>, RenderError> {
        log::info!(
            "selected device: {} (queue family {})",
            physical.name(),
            queue_family
        );

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extension_ptrs: Vec<*const c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&physical.features);

        let hooks = instance.hooks();
        let device = unsafe {
            instance
                .raw()
                .create_device(physical.handle, &create_info, hooks.as_vk())?
        };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok(Arc::new(Self {
            device,
            queue,
            queue_family,
            physical,
            hooks,
            instance,
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        self.instance.raw()
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// The allocation hook set every device-owned object is created and
    /// destroyed with.
    pub fn alloc(&self) -> Option<&vk::AllocationCallbacks> {
        self.hooks.as_vk()
    }

    /// Block until the fence signals, bounding the in-flight frame count.
    pub fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<(), RenderError> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout)? };
        Ok(())
    }

    pub fn reset_fence(&self, fence: vk::Fence) -> Result<(), RenderError> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    /// Submit one command buffer to the queue, waiting on `wait` at the
    /// given stages and signalling `signal` plus `fence` on completion.
    pub fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<(), RenderError> {
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signal);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], fence)?
        };
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

#[cfg(test)]
impl Device {
    /// Device on the first graphics-capable queue family, no surface
    /// involved. For driver-gated tests only.
    pub(crate) fn headless(instance: Arc<Instance>) -> Result<Arc<Self>, RenderError> {
        let (physical, queue_family) = instance
            .physical_devices()
            .iter()
            .find_map(|info| {
                let families = unsafe {
                    instance
                        .raw()
                        .get_physical_device_queue_family_properties(info.handle)
                };
                families
                    .iter()
                    .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|i| (info.clone(), i as u32))
            })
            .ok_or(RenderError::NoSuitableDevice)?;

        Self::from_parts(instance, physical, queue_family, &[])
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.wait_idle();
        unsafe {
            self.device.destroy_device(self.hooks.as_vk());
        }
    }
}

/// First match in enumeration order wins. `present_family` performs the
/// surface-dependent checks and reports the combined graphics+present queue
/// family, or `None` when the device cannot present.
fn select_physical_device<'a>(
    devices: &'a [PhysicalDeviceInfo],
    selector: &impl Fn(&PhysicalDeviceInfo) -> bool,
    extensions: &[&CStr],
    mut present_family: impl FnMut(&PhysicalDeviceInfo) -> Option<u32>,
) -> Result<(&'a PhysicalDeviceInfo, u32), RenderError> {
    devices
        .iter()
        .find_map(|info| {
            if !selector(info) || !info.supports_extensions(extensions) {
                return None;
            }
            present_family(info).map(|family| (info, family))
        })
        .ok_or(RenderError::NoSuitableDevice)
}

/// Surface-side suitability: the device must report at least one surface
/// format and present mode, and own a queue family that is graphics-capable
/// and can present to this surface.
fn presentable_queue_family(
    instance: &ash::Instance,
    surface: &Surface,
    info: &PhysicalDeviceInfo,
) -> Option<u32> {
    let support = SwapchainSupport::query(surface, info.handle).ok()?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return None;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(info.handle) };

    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = surface
            .supports_queue_family(info.handle, index)
            .unwrap_or(false);
        (graphics && present).then_some(index)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_device(device_id: u32) -> PhysicalDeviceInfo {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.device_id = device_id;
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::null(),
            properties,
            features: vk::PhysicalDeviceFeatures::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            extensions: Vec::new(),
        }
    }

    #[test]
    fn first_match_wins_in_enumeration_order() {
        let devices = [fake_device(10), fake_device(20), fake_device(30)];

        let (picked, family) = select_physical_device(
            &devices,
            &|info| info.properties.device_id >= 20,
            &[],
            |_| Some(3),
        )
        .unwrap();

        assert_eq!(picked.properties.device_id, 20);
        assert_eq!(family, 3);
    }

    #[test]
    fn no_matching_device_is_an_error() {
        let devices = [fake_device(1), fake_device(2)];

        let result = select_physical_device(&devices, &|_| false, &[], |_| Some(0));
        assert!(matches!(result, Err(RenderError::NoSuitableDevice)));
    }

    #[test]
    fn device_without_present_family_is_skipped() {
        let devices = [fake_device(1), fake_device(2)];

        let (picked, family) = select_physical_device(&devices, &|_| true, &[], |info| {
            (info.properties.device_id == 2).then_some(7)
        })
        .unwrap();

        assert_eq!(picked.properties.device_id, 2);
        assert_eq!(family, 7);
    }

    #[test]
    fn missing_extension_fails_selection() {
        let devices = [fake_device(1)];

        let result =
            select_physical_device(&devices, &|_| true, &[c"VK_KHR_swapchain"], |_| Some(0));
        assert!(matches!(result, Err(RenderError::NoSuitableDevice)));
    }

    #[test]
    fn empty_enumeration_is_no_suitable_device() {
        let devices: [PhysicalDeviceInfo; 0] = [];
        let result = select_physical_device(&devices, &|_| true, &[], |_| Some(0));
        assert!(matches!(result, Err(RenderError::NoSuitableDevice)));
    }
}
