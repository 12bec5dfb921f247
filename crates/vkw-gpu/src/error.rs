//! GPU error types.

use ash::vk;
use thiserror::Error;

/// Errors reported by the wrapper layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// A requested layer, extension, feature, format, or queue capability is not present.
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// A request violates an invariant that is checked before the driver call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The driver ran out of memory or descriptors.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(vk::Result),

    /// Any other non-success driver status.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// The shader compiler rejected its input.
    #[error("Shader compilation failed: {0}")]
    ShaderCompileFailed(String),

    /// Presentation succeeded but the swapchain no longer matches the surface.
    #[error("Swapchain is suboptimal for the surface")]
    PresentSuboptimal,

    /// A wait or acquire ran out of time.
    #[error("Timed out waiting for the device")]
    Timeout,
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_FRAGMENTATION
            | vk::Result::ERROR_TOO_MANY_OBJECTS => Self::ResourceExhausted(result),
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_codes_are_classified() {
        assert_eq!(
            GpuError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GpuError::ResourceExhausted(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        );
        assert_eq!(
            GpuError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            GpuError::ResourceExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
        );
        assert_eq!(GpuError::from(vk::Result::TIMEOUT), GpuError::Timeout);
        assert_eq!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST),
            GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)
        );
    }
}
