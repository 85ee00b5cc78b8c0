// Per-frame synchronisation
//
// Each in-flight frame owns two semaphores and a fence. The fence starts
// signalled so the first wait on every slot passes immediately.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use crate::error::RenderError;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    device: Arc<Device>,
}

impl FrameSync {
    pub fn new(device: Arc<Device>) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info =
            vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let alloc = device.alloc();
            let image_available = device.raw().create_semaphore(&semaphore_info, alloc)?;

            let render_finished = match device.raw().create_semaphore(&semaphore_info, alloc) {
                Ok(s) => s,
                Err(e) => {
                    device.raw().destroy_semaphore(image_available, alloc);
                    return Err(e.into());
                }
            };

            let in_flight = match device.raw().create_fence(&fence_info, alloc) {
                Ok(f) => f,
                Err(e) => {
                    device.raw().destroy_semaphore(image_available, alloc);
                    device.raw().destroy_semaphore(render_finished, alloc);
                    return Err(e.into());
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight,
                device,
            })
        }
    }

    /// One sync set per in-flight frame.
    pub fn per_frame(device: &Arc<Device>) -> Result<Vec<Self>, RenderError> {
        (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Self::new(device.clone()))
            .collect()
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            let alloc = self.device.alloc();
            self.device.raw().destroy_semaphore(self.image_available, alloc);
            self.device.raw().destroy_semaphore(self.render_finished, alloc);
            self.device.raw().destroy_fence(self.in_flight, alloc);
        }
    }
}
