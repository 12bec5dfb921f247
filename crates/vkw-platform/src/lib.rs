//! Platform layer for the Vulkan wrapper.
//!
//! Provides a native window with its presentation surface and a polled
//! event pump via winit.

mod window;

use std::ffi::CStr;
use thiserror::Error;
use vkw_gpu::GpuError;

pub use window::{Window, WindowEvent, WindowState};
pub use winit::keyboard::KeyCode;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Window configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Window".to_string(),
            width: 1280,
            height: 1024,
            resizable: false,
        }
    }
}

impl WindowConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }
}

/// Instance extensions a window surface needs on this platform.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    vkw_gpu::util::surface_extensions()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_fixed_size() {
        let config = WindowConfig::default();
        assert_eq!((config.width, config.height), (1280, 1024));
        assert!(!config.resizable);
    }

    #[test]
    fn surface_extension_comes_first() {
        let extensions = required_instance_extensions();
        assert_eq!(extensions[0], vkw_gpu::ash::khr::surface::NAME);
        assert!(extensions.len() >= 2);
    }

    #[test]
    fn gpu_errors_convert() {
        let err: PlatformError = GpuError::Timeout.into();
        assert!(matches!(err, PlatformError::Gpu(GpuError::Timeout)));
    }
}
