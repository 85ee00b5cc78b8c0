// Command pool and per-frame command buffers
//
// One pool on the graphics family with individually resettable buffers, one
// buffer per in-flight frame. Recording wraps the render pass and pipeline
// bind and hands the open command buffer to a caller-supplied draw closure.
// One-shot submission covers transfer work during setup.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::pipeline::{Framebuffers, Pipeline, RenderPass};
use crate::error::RenderError;

pub struct Commands {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<Device>,
}

impl Commands {
    pub fn new(device: Arc<Device>, count: u32) -> Result<Self, RenderError> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_family());

        let pool = unsafe { device.raw().create_command_pool(&pool_info, device.alloc())? };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe {
            match device.raw().allocate_command_buffers(&alloc_info) {
                Ok(buffers) => buffers,
                Err(e) => {
                    device.raw().destroy_command_pool(pool, device.alloc());
                    return Err(e.into());
                }
            }
        };

        Ok(Self {
            pool,
            buffers,
            device,
        })
    }

    pub fn get(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }

    pub fn reset(&self, slot: usize) -> Result<(), RenderError> {
        unsafe {
            self.device
                .raw()
                .reset_command_buffer(self.buffers[slot], vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    /// Record the frame's commands into `slot`: begin, open the render pass
    /// on the framebuffer for `image_index`, bind the pipeline, set the
    /// dynamic viewport and scissor to the full extent, run `draw`, close
    /// everything.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        slot: usize,
        image_index: u32,
        render_pass: &RenderPass,
        framebuffers: &Framebuffers,
        pipeline: &Pipeline,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        draw: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<(), RenderError> {
        let device = self.device.raw();
        let cmd = self.buffers[slot];

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.raw())
            .framebuffer(framebuffers.get(image_index))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.raw());

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);

            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            device.cmd_set_scissor(cmd, 0, &[scissor]);

            draw(device, cmd);

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    /// Allocate a transient buffer, record `f` into it, submit, and wait for
    /// the queue to drain. Used for setup transfers only.
    pub fn one_shot(
        &self,
        f: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<(), RenderError> {
        let device = self.device.raw();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { device.allocate_command_buffers(&alloc_info)?[0] };

        let result = (|| -> Result<(), RenderError> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            unsafe {
                device.begin_command_buffer(cmd, &begin_info)?;
                f(device, cmd);
                device.end_command_buffer(cmd)?;
            }

            self.device
                .submit(cmd, &[], &[], &[], vk::Fence::null())?;
            unsafe { device.queue_wait_idle(self.device.queue())? };
            Ok(())
        })();

        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        result
    }
}

impl Drop for Commands {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_command_pool(self.pool, self.device.alloc());
        }
    }
}
