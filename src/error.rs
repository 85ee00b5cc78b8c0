// Error taxonomy for the renderer core
//
// Every fallible backend operation returns Result<_, RenderError>. The frame
// loop decides per call site whether a variant is recoverable (OutOfDate ->
// recreate the swapchain) or fatal (propagate to the caller).

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("out of host memory")]
    NoHostMemory,

    #[error("out of device memory")]
    NoDeviceMemory,

    #[error("driver initialisation failed")]
    InitializationFailed,

    #[error("device lost")]
    DeviceLost,

    #[error("memory map failed")]
    MemoryMapFailed,

    #[error("requested layer unavailable")]
    LayerUnavailable,

    #[error("requested extension unavailable")]
    ExtensionUnavailable,

    #[error("requested feature unavailable")]
    FeatureUnavailable,

    #[error("incompatible driver")]
    IncompatibleDriver,

    #[error("command pool fragmented")]
    FragmentedPool,

    #[error("out of pool memory")]
    NoPoolMemory,

    #[error("surface lost")]
    SurfaceLost,

    #[error("native window already in use")]
    NativeWindowInUse,

    #[error("swapchain out of date")]
    OutOfDate,

    #[error("wait timed out")]
    Timeout,

    #[error("validation failed")]
    ValidationFailed,

    #[error("no physical device satisfies the requested capabilities")]
    NoSuitableDevice,

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to load the Vulkan library")]
    LibraryLoad(#[from] ash::LoadingError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Any driver result code without a dedicated variant.
    #[error("driver reported {0:?}")]
    Driver(vk::Result),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::NoHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::NoDeviceMemory,
            vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_MEMORY_MAP_FAILED => Self::MemoryMapFailed,
            vk::Result::ERROR_LAYER_NOT_PRESENT => Self::LayerUnavailable,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => Self::ExtensionUnavailable,
            vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::FeatureUnavailable,
            vk::Result::ERROR_INCOMPATIBLE_DRIVER => Self::IncompatibleDriver,
            vk::Result::ERROR_FRAGMENTED_POOL => Self::FragmentedPool,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY => Self::NoPoolMemory,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => Self::NativeWindowInUse,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::TIMEOUT => Self::Timeout,
            vk::Result::ERROR_VALIDATION_FAILED_EXT => Self::ValidationFailed,
            other => Self::Driver(other),
        }
    }
}

impl RenderError {
    /// Staleness conditions that trigger swapchain recreation instead of
    /// terminating the frame loop.
    pub fn is_stale_surface(&self) -> bool {
        matches!(self, Self::OutOfDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_result_codes() {
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_OUT_OF_DATE_KHR),
            RenderError::OutOfDate
        ));
        assert!(matches!(
            RenderError::from(vk::Result::TIMEOUT),
            RenderError::Timeout
        ));
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RenderError::NoDeviceMemory
        ));
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_DEVICE_LOST),
            RenderError::DeviceLost
        ));
    }

    #[test]
    fn unknown_codes_fall_through_to_driver() {
        let err = RenderError::from(vk::Result::ERROR_UNKNOWN);
        assert!(matches!(err, RenderError::Driver(vk::Result::ERROR_UNKNOWN)));
    }

    #[test]
    fn only_out_of_date_is_stale() {
        assert!(RenderError::OutOfDate.is_stale_surface());
        assert!(!RenderError::DeviceLost.is_stale_surface());
        assert!(!RenderError::Timeout.is_stale_surface());
    }
}
