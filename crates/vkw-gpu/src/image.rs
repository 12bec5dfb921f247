//! Images, image views, samplers and depth buffers.

use crate::error::Result;
use crate::logical_device::LogicalDevice;
use crate::memory::DeviceMemory;
use ash::vk;
use std::sync::Arc;

/// Image creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub image_type: vk::ImageType,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub initial_layout: vk::ImageLayout,
    pub memory_properties: vk::MemoryPropertyFlags,
    pub aspect_mask: vk::ImageAspectFlags,
}

impl ImageInfo {
    /// A device-local, optimally tiled 2D image.
    pub fn new_2d(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            initial_layout: vk::ImageLayout::UNDEFINED,
            memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect_mask,
        }
    }

    pub fn with_tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    pub fn with_memory_properties(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.memory_properties = properties;
        self
    }
}

/// Full mip and layer range for `aspect_mask`.
pub fn full_subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// An owned `VkImageView`.
pub struct ImageView {
    device: Arc<LogicalDevice>,
    view: vk::ImageView,
    format: vk::Format,
    subresource_range: vk::ImageSubresourceRange,
}

impl ImageView {
    /// Create a view with identity swizzle.
    pub fn new(
        device: &Arc<LogicalDevice>,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(subresource_range);
        Self::from_info(device, &create_info)
    }

    pub fn from_info(
        device: &Arc<LogicalDevice>,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<Self> {
        let view = unsafe { device.handle().create_image_view(create_info, None)? };

        Ok(Self {
            device: Arc::clone(device),
            view,
            format: create_info.format,
            subresource_range: create_info.subresource_range,
        })
    }

    /// Get the raw view handle.
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.subresource_range
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_image_view(self.view, None) };
    }
}

struct OwnedImage {
    device: Arc<LogicalDevice>,
    image: vk::Image,
}

impl Drop for OwnedImage {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_image(self.image, None) };
    }
}

/// An image with its own memory and a default view.
// Field order is drop order: view, then image, then memory.
pub struct Image {
    view: Arc<ImageView>,
    image: OwnedImage,
    memory: DeviceMemory,
    info: ImageInfo,
}

impl Image {
    /// Create the image, bind fresh memory at offset 0 and build the default view.
    ///
    /// `SAMPLED` is always added to the requested usage.
    pub fn new(device: &Arc<LogicalDevice>, info: ImageInfo) -> Result<Self> {
        let mut info = info;
        info.usage |= vk::ImageUsageFlags::SAMPLED;

        let create_info = vk::ImageCreateInfo::default()
            .image_type(info.image_type)
            .format(info.format)
            .extent(info.extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(info.tiling)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(info.initial_layout);

        let raw = device.handle();
        let image = OwnedImage {
            device: Arc::clone(device),
            image: unsafe { raw.create_image(&create_info, None)? },
        };

        let requirements = unsafe { raw.get_image_memory_requirements(image.image) };
        let memory = DeviceMemory::allocate(device, requirements, info.memory_properties)?;
        unsafe { raw.bind_image_memory(image.image, memory.handle(), 0)? };
        let view = ImageView::new(
            device,
            image.image,
            info.view_type,
            info.format,
            full_subresource_range(info.aspect_mask),
        )?;

        tracing::debug!(
            format = ?info.format,
            width = info.extent.width,
            height = info.extent.height,
            allocation = memory.size(),
            "Created image"
        );

        Ok(Self {
            view: Arc::new(view),
            image,
            memory,
            info,
        })
    }

    /// Get the raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image.image
    }

    /// The default view over the whole image.
    pub fn view(&self) -> &Arc<ImageView> {
        &self.view
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    /// Creation parameters, with the effective usage.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.info.extent
    }
}

/// Creation parameters for a device-local depth attachment viewed through its depth aspect.
pub fn depth_buffer_info(format: vk::Format, extent: vk::Extent2D) -> ImageInfo {
    ImageInfo::new_2d(
        format,
        extent,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::ImageAspectFlags::DEPTH,
    )
}

pub fn create_depth_buffer(
    device: &Arc<LogicalDevice>,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Image> {
    Image::new(device, depth_buffer_info(format, extent))
}

/// An owned `VkSampler`.
pub struct Sampler {
    device: Arc<LogicalDevice>,
    sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(device: &Arc<LogicalDevice>, create_info: &vk::SamplerCreateInfo<'_>) -> Result<Self> {
        let sampler = unsafe { device.handle().create_sampler(create_info, None)? };
        Ok(Self {
            device: Arc::clone(device),
            sampler,
        })
    }

    /// Linear filtering, repeat addressing, optional anisotropy.
    pub fn linear_repeat(device: &Arc<LogicalDevice>, anisotropy: Option<f32>) -> Result<Self> {
        Self::new(device, &linear_repeat_info(anisotropy))
    }

    /// Get the raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_sampler(self.sampler, None) };
    }
}

/// Create info for a linear, repeating sampler.
pub fn linear_repeat_info(anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .mip_lod_bias(0.0)
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .compare_enable(false)
        .compare_op(vk::CompareOp::NEVER)
        .min_lod(0.0)
        .max_lod(0.0)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_2d_defaults() {
        let info = ImageInfo::new_2d(
            vk::Format::D32_SFLOAT,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        );
        assert_eq!(info.extent.depth, 1);
        assert_eq!(info.tiling, vk::ImageTiling::OPTIMAL);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(info.memory_properties, vk::MemoryPropertyFlags::DEVICE_LOCAL);
    }

    #[test]
    fn depth_buffer_views_depth_aspect_only() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 1024,
        };
        for format in [
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D32_SFLOAT,
        ] {
            let info = depth_buffer_info(format, extent);
            assert_eq!(info.aspect_mask, vk::ImageAspectFlags::DEPTH, "{format:?}");
            assert_eq!(info.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
            assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
            assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
        }
    }

    #[test]
    fn sampler_preset() {
        let info = linear_repeat_info(Some(16.0));
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert!((info.max_anisotropy - 16.0).abs() < f32::EPSILON);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);

        let plain = linear_repeat_info(None);
        assert_eq!(plain.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn full_range_covers_one_level_and_layer() {
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
        assert_eq!(range.base_mip_level, 0);
    }
}
