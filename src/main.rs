// Triangle renderer
//
// Wires the backend wrappers into a winit application: one window, one
// device-local vertex buffer, two frames in flight, and swapchain
// recreation on resize or staleness.

mod backend;
mod config;
mod error;

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec3};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

use backend::{
    log_sink, AllocationHooks, Buffer, Commands, Device, Framebuffers, Instance, Pipeline,
    RenderPass, Shader, ShaderStage, Surface, Swapchain, VertexInput, MAX_FRAMES_IN_FLIGHT,
};
use config::Config;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = Config::load();
    log::info!(
        "starting: {}x{}, present mode {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: Vec2,
    colour: Vec3,
}

impl Vertex {
    fn input() -> VertexInput {
        VertexInput {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: 0,
                },
                vk::VertexInputAttributeDescription {
                    location: 1,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: std::mem::size_of::<Vec2>() as u32,
                },
            ],
        }
    }
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: Vec2::new(0.0, -0.5),
        colour: Vec3::new(1.0, 0.25, 0.25),
    },
    Vertex {
        pos: Vec2::new(0.5, 0.5),
        colour: Vec3::new(0.25, 1.0, 0.25),
    },
    Vertex {
        pos: Vec2::new(-0.5, 0.5),
        colour: Vec3::new(0.25, 0.25, 1.0),
    },
];

/// All GPU-side state. Declaration order is teardown order: everything that
/// references the swapchain goes before it, everything device-owned before
/// the device, the surface before the instance.
struct Renderer {
    vertex_buffer: Buffer,
    frame_sync: Vec<backend::FrameSync>,
    commands: Commands,
    framebuffers: Option<Framebuffers>,
    pipeline: Pipeline,
    render_pass: RenderPass,
    swapchain: Option<Swapchain>,
    surface: Surface,
    device: Arc<Device>,
    _instance: Arc<Instance>,
    preferred_present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
}

impl Renderer {
    fn new(config: &Config, window: &Window) -> Result<Self> {
        use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

        let sink = config.debug.diagnostics.then(log_sink);
        let instance = Instance::new(&config.window.title, sink, AllocationHooks::none())?;

        let display_handle = window
            .display_handle()
            .context("failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("failed to get window handle")?
            .as_raw();
        let surface = Surface::new(instance.clone(), display_handle, window_handle)?;

        let extensions = [ash::extensions::khr::Swapchain::name()];
        let device = Device::new(instance.clone(), &surface, |_| true, &extensions)?;

        let size = window.inner_size();
        let preferred_present_mode = config.present_mode();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            (size.width, size.height),
            preferred_present_mode,
        )?;

        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;

        let vertex_shader =
            Shader::from_file(device.clone(), "shaders/triangle.vert.spv", ShaderStage::Vertex)?;
        let fragment_shader = Shader::from_file(
            device.clone(),
            "shaders/triangle.frag.spv",
            ShaderStage::Fragment,
        )?;
        let pipeline = Pipeline::new(
            device.clone(),
            &render_pass,
            &[&vertex_shader, &fragment_shader],
            &Vertex::input(),
        )?;

        let framebuffers = Framebuffers::new(device.clone(), &render_pass, &swapchain)?;
        let commands = Commands::new(device.clone(), MAX_FRAMES_IN_FLIGHT as u32)?;
        let frame_sync = backend::FrameSync::per_frame(&device)?;

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            &commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &TRIANGLE,
        )?;

        log::info!("renderer initialised");

        Ok(Self {
            vertex_buffer,
            frame_sync,
            commands,
            framebuffers: Some(framebuffers),
            pipeline,
            render_pass,
            swapchain: Some(swapchain),
            surface,
            device,
            _instance: instance,
            preferred_present_mode,
            clear_color: config.graphics.clear_color,
        })
    }

    /// Tear down the old swapchain and framebuffers and build fresh ones at
    /// the current framebuffer size. The surface allows only one swapchain
    /// at a time, so the old one is dropped first.
    fn recreate_swapchain(&mut self, framebuffer: (u32, u32)) -> Result<()> {
        self.device.wait_idle()?;

        self.framebuffers = None;
        self.swapchain = None;

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            framebuffer,
            self.preferred_present_mode,
        )?;
        let framebuffers =
            Framebuffers::new(self.device.clone(), &self.render_pass, &swapchain)?;

        self.swapchain = Some(swapchain);
        self.framebuffers = Some(framebuffers);
        Ok(())
    }

    /// Record and submit one frame from sync slot `frame`. Returns true when
    /// the swapchain needs to be recreated.
    fn render_frame(&mut self, frame: usize) -> Result<bool> {
        let sync = &self.frame_sync[frame];
        let swapchain = self.swapchain.as_ref().context("swapchain missing")?;
        let framebuffers = self.framebuffers.as_ref().context("framebuffers missing")?;

        self.device.wait_for_fence(sync.in_flight, u64::MAX)?;

        let (image_index, suboptimal) =
            match swapchain.acquire_next_image(u64::MAX, sync.image_available) {
                Ok(acquired) => acquired,
                Err(e) if e.is_stale_surface() => return Ok(true),
                Err(e) => return Err(e.into()),
            };

        self.device.reset_fence(sync.in_flight)?;
        self.commands.reset(frame)?;

        let vertex_buffer = self.vertex_buffer.raw();
        self.commands.record(
            frame,
            image_index,
            &self.render_pass,
            framebuffers,
            &self.pipeline,
            swapchain.extent(),
            self.clear_color,
            |device, cmd| unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer], &[0]);
                device.cmd_draw(cmd, 3, 1, 0, 0);
            },
        )?;

        self.device.submit(
            self.commands.get(frame),
            &[sync.image_available],
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            &[sync.render_finished],
            sync.in_flight,
        )?;

        let rebuild = swapchain.present(
            self.device.queue(),
            image_index,
            &[sync.render_finished],
        )?;

        Ok(rebuild || suboptimal)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // The GPU may still be consuming any of these resources.
        let _ = self.device.wait_idle();
    }
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    current_frame: usize,
    needs_resize: bool,
    is_minimized: bool,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            current_frame: 0,
            needs_resize: false,
            is_minimized: false,
        }
    }

    fn redraw(&mut self) -> Result<()> {
        if self.is_minimized {
            return Ok(());
        }

        let window = self.window.as_ref().context("window missing")?.clone();

        if self.needs_resize {
            let size = window.inner_size();
            if size.width == 0 || size.height == 0 {
                self.is_minimized = true;
                return Ok(());
            }
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.recreate_swapchain((size.width, size.height))?;
            }
            self.needs_resize = false;
        }

        if let Some(renderer) = self.renderer.as_mut() {
            let rebuild = renderer.render_frame(self.current_frame)?;
            if rebuild {
                self.needs_resize = true;
            }
        }

        // The sync slot advances whether or not the frame presented, so a
        // rebuilt swapchain never reuses a slot out of order.
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&self.config, &window) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("failed to initialise renderer: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    log::error!("render error: {:?}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);

        let input = Vertex::input();
        assert_eq!(input.bindings[0].stride, 20);
        assert_eq!(input.attributes[0].offset, 0);
        assert_eq!(input.attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(input.attributes[1].offset, 8);
        assert_eq!(input.attributes[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn triangle_has_one_saturated_channel_per_vertex() {
        for (i, v) in TRIANGLE.iter().enumerate() {
            let channels = [v.colour.x, v.colour.y, v.colour.z];
            assert_eq!(channels[i], 1.0);
        }
    }
}
