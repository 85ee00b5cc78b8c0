// Swapchain negotiation and presentation
//
// Negotiates format, present mode, extent, and image count against the
// surface's reported capabilities, owns the image views over the driver's
// presentable images, and surfaces staleness (out of date / suboptimal)
// distinctly from fatal errors so the frame loop can rebuild instead of
// dying.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::surface::Surface;
use crate::error::RenderError;

/// Preferred pairing when the surface offers it; otherwise the first
/// enumerated format wins.
const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Surface capability snapshot used for negotiation. The selection policies
/// are pure functions over this data.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Self, RenderError> {
        let handle = surface.handle();
        let loader = surface.loader();

        let capabilities =
            unsafe { loader.get_physical_device_surface_capabilities(device, handle)? };
        let formats = unsafe { loader.get_physical_device_surface_formats(device, handle)? };
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(device, handle)? };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// None only when the surface reports no formats at all, which device
    /// selection normally rules out.
    fn choose_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.formats
            .iter()
            .copied()
            .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
            .or_else(|| self.formats.first().copied())
    }

    /// The configured mode if enumerated, else FIFO (which is always
    /// supported).
    fn choose_present_mode(&self, preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if self.present_modes.contains(&preferred) {
            preferred
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    /// The surface's current extent, unless it reports the "undefined"
    /// sentinel, in which case the framebuffer size clamped into the
    /// surface's bounds.
    fn choose_extent(&self, framebuffer: (u32, u32)) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }

        vk::Extent2D {
            width: framebuffer.0.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: framebuffer.1.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    }

    /// One more than the minimum, capped by the maximum only when the
    /// surface actually reports one (zero means unbounded).
    fn choose_image_count(&self) -> u32 {
        let caps = &self.capabilities;
        let desired = caps.min_image_count + 1;
        if caps.max_image_count == 0 {
            desired
        } else {
            desired.min(caps.max_image_count)
        }
    }
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    loader: ash::extensions::khr::Swapchain,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    device: Arc<Device>,
}

impl Swapchain {
    /// Negotiate and create a swapchain for `surface`. `framebuffer` is the
    /// window's current framebuffer size in pixels, used only when the
    /// surface leaves the extent undefined.
    pub fn new(
        device: Arc<Device>,
        surface: &Surface,
        framebuffer: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, RenderError> {
        let support = SwapchainSupport::query(surface, device.physical().handle)?;

        let surface_format = support
            .choose_format()
            .ok_or(RenderError::InitializationFailed)?;
        let present_mode = support.choose_present_mode(preferred_present_mode);
        let extent = support.choose_extent(framebuffer);
        let image_count = support.choose_image_count();

        log::info!(
            "creating swapchain: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let loader = ash::extensions::khr::Swapchain::new(device.instance(), device.raw());

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let alloc = device.alloc();
        let swapchain = unsafe { loader.create_swapchain(&create_info, alloc)? };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, alloc) };
                return Err(e.into());
            }
        };

        // A failed view leaves the earlier ones and the swapchain orphaned
        // unless they are torn down here.
        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_image_view(&device, image, surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for &view in &image_views {
                            device.raw().destroy_image_view(view, alloc);
                        }
                        loader.destroy_swapchain(swapchain, alloc);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            swapchain,
            loader,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Acquire the next presentable image, signalling `semaphore` when the
    /// image is ready. Returns the image index and a suboptimal flag; an
    /// out-of-date surface comes back as `RenderError::OutOfDate` for the
    /// frame loop to catch.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), RenderError> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };
        result.map_err(RenderError::from)
    }

    /// Present the acquired image, waiting on `wait_semaphores`. Returns
    /// true when the swapchain should be rebuilt (suboptimal or out of
    /// date); anything else is fatal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, RenderError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.raw().destroy_image_view(view, self.device.alloc());
            }
            self.loader
                .destroy_swapchain(self.swapchain, self.device.alloc());
        }
    }
}

fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, RenderError> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = unsafe { device.raw().create_image_view(&create_info, device.alloc())? };
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support(
        capabilities: vk::SurfaceCapabilitiesKHR,
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    ) -> SwapchainSupport {
        SwapchainSupport {
            capabilities,
            formats,
            present_modes,
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn format_prefers_bgra_srgb() {
        let s = support(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            vec![],
        );

        assert_eq!(s.choose_format().unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_falls_back_to_first_enumerated() {
        let s = support(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            vec![],
        );

        assert_eq!(s.choose_format().unwrap().format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn empty_format_list_yields_none_not_panic() {
        let s = support(vk::SurfaceCapabilitiesKHR::default(), vec![], vec![]);
        assert!(s.choose_format().is_none());
    }

    #[test]
    fn present_mode_honours_preference_else_fifo() {
        let s = support(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![],
            vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ],
        );
        assert_eq!(
            s.choose_present_mode(vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );

        let s = support(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![],
            vec![vk::PresentModeKHR::FIFO],
        );
        assert_eq!(
            s.choose_present_mode(vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.min_image_count = 2;
        caps.max_image_count = 8;
        assert_eq!(support(caps, vec![], vec![]).choose_image_count(), 3);

        caps.min_image_count = 3;
        caps.max_image_count = 3;
        assert_eq!(support(caps, vec![], vec![]).choose_image_count(), 3);
    }

    #[test]
    fn zero_max_image_count_means_unbounded() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.min_image_count = 4;
        caps.max_image_count = 0;
        // A naive min() with 0 would clamp to zero images.
        assert_eq!(support(caps, vec![], vec![]).choose_image_count(), 5);
    }

    #[test]
    fn extent_uses_surface_current_extent_when_defined() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = support(caps, vec![], vec![]).choose_extent((1920, 1080));
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn undefined_extent_clamps_framebuffer_size() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.min_image_extent = vk::Extent2D {
            width: 200,
            height: 200,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 1000,
            height: 1000,
        };
        let s = support(caps, vec![], vec![]);

        // Oversized window clamps down, undersized clamps up.
        let extent = s.choose_extent((4096, 50));
        assert_eq!(extent.width, 1000);
        assert_eq!(extent.height, 200);

        let extent = s.choose_extent((640, 480));
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }
}
