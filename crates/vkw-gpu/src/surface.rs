//! Presentation surfaces.
//!
//! A [`Surface`] is created from any window exposing raw window handles and
//! is destroyed when the last owner lets go of it.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// A `VkSurfaceKHR` bound to an instance.
pub struct Surface {
    surface: vk::SurfaceKHR,
    instance: Arc<Instance>,
}

impl Surface {
    /// Create a surface for a native window.
    pub fn from_window<W>(instance: Arc<Instance>, window: &W) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window.display_handle().map_err(|e| {
            GpuError::UnsupportedCapability(format!("Failed to get display handle: {e}"))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            GpuError::UnsupportedCapability(format!("Failed to get window handle: {e}"))
        })?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )?
        };
        tracing::debug!("Created surface {surface:?}");

        Ok(Arc::new(Self { surface, instance }))
    }

    /// Get the raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Whether `family_index` of `physical_device` can present to this surface.
    pub fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family_index, self.surface)?
        };
        Ok(supported)
    }

    /// Query surface capabilities, formats and present modes.
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceCapabilities> {
        let loader = self.instance.surface_loader();
        unsafe {
            Ok(SurfaceCapabilities {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, self.surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader()
                .destroy_surface(self.surface, None);
        }
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
