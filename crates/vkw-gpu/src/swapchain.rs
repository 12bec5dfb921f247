//! Swapchain management.

use crate::error::{GpuError, Result};
use crate::image::{full_subresource_range, ImageView};
use crate::logical_device::LogicalDevice;
use crate::queue::Queue;
use crate::surface::Surface;
use ash::vk;
use std::sync::Arc;

/// Parameters captured when the swapchain is created.
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub format: vk::SurfaceFormatKHR,
    pub usage: vk::ImageUsageFlags,
    /// Requested size; the negotiated extent may differ.
    pub size: vk::Extent2D,
    pub vsync: bool,
    /// Families that access the images. Two or more distinct entries
    /// select concurrent sharing.
    pub shared_queue_families: Vec<u32>,
}

impl SwapchainInfo {
    pub fn new(format: vk::SurfaceFormatKHR, size: vk::Extent2D) -> Self {
        Self {
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            size,
            vsync: true,
            shared_queue_families: Vec::new(),
        }
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_shared_queue_families(mut self, families: Vec<u32>) -> Self {
        self.shared_queue_families = families;
        self
    }
}

/// Swapchain wrapper that owns its image views.
pub struct Swapchain {
    device: Arc<LogicalDevice>,
    surface: Arc<Surface>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<Arc<ImageView>>,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    info: SwapchainInfo,
}

impl Swapchain {
    /// Create a swapchain for `surface`.
    pub fn new(device: &Arc<LogicalDevice>, surface: Arc<Surface>, info: SwapchainInfo) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());
        let mut swapchain = Self {
            device: Arc::clone(device),
            surface,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            extent: info.size,
            present_mode: vk::PresentModeKHR::FIFO,
            info,
        };
        swapchain.rebuild()?;
        Ok(swapchain)
    }

    /// Negotiate parameters with the surface and (re)create the swapchain.
    ///
    /// The previous swapchain, if any, is handed to the driver as `oldSwapchain`
    /// and destroyed once the new one exists.
    pub fn rebuild(&mut self) -> Result<()> {
        let surface_caps = self.surface.capabilities(self.device.physical_device())?;
        let caps = &surface_caps.capabilities;

        let present_mode = select_present_mode(&surface_caps.present_modes, self.info.vsync);
        let extent = calculate_extent(caps, self.info.size);
        let pre_transform = select_pre_transform(caps);
        let composite_alpha = select_composite_alpha(caps.supported_composite_alpha);
        let (sharing_mode, families) = sharing_mode(&self.info.shared_queue_families);
        let old_swapchain = self.swapchain;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(caps.min_image_count)
            .image_format(self.info.format.format)
            .image_color_space(self.info.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.info.usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        let images = match unsafe { self.loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        let format = self.info.format.format;
        let image_views = images
            .iter()
            .map(|&image| {
                ImageView::from_info(&self.device, &image_view_info(image, format)).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>();
        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        // Old views go before the old swapchain.
        self.image_views = image_views;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }

        self.swapchain = swapchain;
        self.images = images;
        self.extent = extent;
        self.present_mode = present_mode;

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = self.images.len(),
            ?present_mode,
            format = ?self.info.format.format,
            "Built swapchain"
        );
        Ok(())
    }

    /// Wait for the device, store the new size and rebuild.
    pub fn resize(&mut self, size: vk::Extent2D) -> Result<()> {
        self.device.wait_idle()?;
        self.info.size = size;
        self.rebuild()
    }

    /// Acquire the next presentable image.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool)> {
        let acquired = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, fence)?
        };
        Ok(acquired)
    }

    /// Present image `index` on `queue` after `wait_semaphores` signal.
    ///
    /// A suboptimal or out-of-date swapchain is logged and reported as
    /// [`GpuError::PresentSuboptimal`]; the caller should rebuild.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(level = "trace", skip_all))]
    pub fn present(&self, queue: &Queue, index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue.handle(), &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                tracing::warn!("Swapchain is suboptimal or out of date");
                Err(GpuError::PresentSuboptimal)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get the raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[Arc<ImageView>] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.info.format.format
    }

    /// The negotiated extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn info(&self) -> &SwapchainInfo {
        &self.info
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.image_views.clear();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
    }
}

/// Select the present mode.
///
/// FIFO is always available and is used for vsync; otherwise the first of
/// mailbox and immediate that the surface supports.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub fn select_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn select_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&alpha| supported.contains(alpha))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Sharing mode and family list for the swapchain images.
pub fn sharing_mode(families: &[u32]) -> (vk::SharingMode, Vec<u32>) {
    let mut distinct = families.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() >= 2 {
        (vk::SharingMode::CONCURRENT, distinct)
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

/// View over one swapchain image: 2D, color aspect, first level and layer.
fn image_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(full_subresource_range(vk::ImageAspectFlags::COLOR))
}
