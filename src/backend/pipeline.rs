// Render pass, graphics pipeline, and framebuffers
//
// One colour attachment, one subpass. The pipeline keeps viewport and
// scissor dynamic so a window resize only needs new framebuffers, not a
// pipeline rebuild.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::shader::Shader;
use super::swapchain::Swapchain;
use crate::error::RenderError;

pub struct RenderPass {
    render_pass: vk::RenderPass,
    device: Arc<Device>,
}

impl RenderPass {
    /// Single colour attachment matching the swapchain format, cleared on
    /// load and transitioned to present layout at the end of the subpass.
    pub fn new(device: Arc<Device>, format: vk::Format) -> Result<Self, RenderError> {
        let attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref))
            .build();

        // The external dependency delays colour writes until the acquired
        // image is actually ready.
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(std::slice::from_ref(&attachment))
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let render_pass =
            unsafe { device.raw().create_render_pass(&create_info, device.alloc())? };

        Ok(Self {
            render_pass,
            device,
        })
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_render_pass(self.render_pass, self.device.alloc());
        }
    }
}

/// Vertex layout handed to pipeline creation.
pub struct VertexInput {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: Arc<Device>,
}

impl Pipeline {
    /// Fixed-function state is the usual triangle-list setup: no blending,
    /// back-face culling off, fill mode, one sample. Viewport and scissor
    /// come in at record time via dynamic state.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        shaders: &[&Shader],
        vertex_input: &VertexInput,
    ) -> Result<Self, RenderError> {
        let alloc = device.alloc();

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.raw().create_pipeline_layout(&layout_info, alloc)? };

        let stages: Vec<vk::PipelineShaderStageCreateInfo> =
            shaders.iter().map(|s| s.stage_info()).collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.raw())
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], alloc)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.raw().destroy_pipeline_layout(layout, alloc) };
                return Err(e.into());
            }
        };

        log::info!("graphics pipeline created");

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_pipeline(self.pipeline, self.device.alloc());
            self.device
                .raw()
                .destroy_pipeline_layout(self.layout, self.device.alloc());
        }
    }
}

pub struct Framebuffers {
    framebuffers: Vec<vk::Framebuffer>,
    device: Arc<Device>,
}

impl Framebuffers {
    /// One framebuffer per swapchain image view, all at the swapchain extent.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        swapchain: &Swapchain,
    ) -> Result<Self, RenderError> {
        let extent = swapchain.extent();
        let alloc = device.alloc();

        let mut framebuffers = Vec::with_capacity(swapchain.image_views().len());
        for &view in swapchain.image_views() {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.raw())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match unsafe { device.raw().create_framebuffer(&create_info, alloc) } {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    unsafe {
                        for &fb in &framebuffers {
                            device.raw().destroy_framebuffer(fb, alloc);
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            framebuffers,
            device,
        })
    }

    pub fn get(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &fb in &self.framebuffers {
                self.device
                    .raw()
                    .destroy_framebuffer(fb, self.device.alloc());
            }
        }
    }
}
