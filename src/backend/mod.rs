// Vulkan backend
//
// Thin safety layer over ash: each wrapper owns exactly one driver object
// (or a small family of them), keeps its parent alive through an Arc, and
// releases the object on drop.

pub mod buffer;
pub mod commands;
pub mod debug;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::Buffer;
pub use commands::Commands;
pub use debug::{log_sink, DiagnosticSink};
pub use device::Device;
pub use instance::{AllocationHooks, Instance, PhysicalDeviceInfo};
pub use pipeline::{Framebuffers, Pipeline, RenderPass, VertexInput};
pub use shader::{Shader, ShaderStage};
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};
