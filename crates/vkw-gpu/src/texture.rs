//! Sampled textures filled by a host-side generator.
//!
//! A texture picks between two upload paths when it is created. If the
//! format supports the requested features with linear tiling the image is
//! written directly through a host mapping; otherwise (or when staging is
//! forced) it uses optimal tiling and a host-visible staging buffer.

use crate::buffer::Buffer;
use crate::error::{GpuError, Result};
use crate::image::{Image, ImageInfo, Sampler};
use crate::layout::set_image_layout;
use crate::logical_device::LogicalDevice;
use crate::memory::HOST_MEMORY;
use ash::vk;
use std::sync::Arc;

/// Texture creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct TextureInfo {
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub format: vk::Format,
    /// Format features the chosen tiling must support.
    pub feature_flags: vk::FormatFeatureFlags,
    /// Max anisotropy, or `None` to disable anisotropic filtering.
    pub anisotropy: Option<f32>,
    pub force_staging: bool,
}

impl TextureInfo {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            usage: vk::ImageUsageFlags::SAMPLED,
            format: vk::Format::R8G8B8A8_UNORM,
            feature_flags: vk::FormatFeatureFlags::SAMPLED_IMAGE,
            anisotropy: None,
            force_staging: false,
        }
    }

    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_feature_flags(mut self, flags: vk::FormatFeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    pub fn with_anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.anisotropy = Some(max_anisotropy);
        self
    }

    pub fn with_force_staging(mut self, force: bool) -> Self {
        self.force_staging = force;
        self
    }
}

/// Bytes per texel for the uncompressed color formats textures accept.
pub fn bytes_per_texel(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Decide whether a texture needs a staging buffer.
///
/// Fails when neither tiling supports `features`.
pub fn needs_staging(
    properties: &vk::FormatProperties,
    features: vk::FormatFeatureFlags,
    force_staging: bool,
) -> Result<bool> {
    let linear = properties.linear_tiling_features.contains(features);
    let staged = force_staging || !linear;
    if staged && !properties.optimal_tiling_features.contains(features) {
        return Err(GpuError::UnsupportedCapability(format!(
            "format features {features:?} not supported with {} tiling",
            if linear { "optimal" } else { "linear or optimal" }
        )));
    }
    Ok(staged)
}

/// Fill an RGBA8 buffer with an 8x8-cell black and white checkerboard.
pub fn checkerboard(dst: &mut [u8], extent: vk::Extent2D) {
    const CELL: u32 = 8;
    for (i, texel) in dst.chunks_exact_mut(4).enumerate() {
        let x = i as u32 % extent.width.max(1);
        let y = i as u32 / extent.width.max(1);
        let value = if ((x / CELL) + (y / CELL)) % 2 == 0 {
            0xff
        } else {
            0x00
        };
        texel.copy_from_slice(&[value, value, value, 0xff]);
    }
}

/// A sampled image with its sampler and, when needed, a staging buffer.
pub struct Texture {
    device: Arc<LogicalDevice>,
    image: Image,
    sampler: Arc<Sampler>,
    staging: Option<Buffer<u8>>,
    info: TextureInfo,
}

impl Texture {
    pub fn new(device: &Arc<LogicalDevice>, info: TextureInfo) -> Result<Self> {
        let texel = bytes_per_texel(info.format).ok_or_else(|| {
            GpuError::UnsupportedCapability(format!("texture format {:?}", info.format))
        })?;
        let properties = device
            .instance()
            .format_properties(device.physical_device(), info.format);
        let staged = needs_staging(&properties, info.feature_flags, info.force_staging)?;

        let base = ImageInfo::new_2d(
            info.format,
            info.extent,
            info.usage,
            vk::ImageAspectFlags::COLOR,
        );
        let (image_info, staging) = if staged {
            let len = info.extent.width as usize * info.extent.height as usize * texel;
            let staging = Buffer::<u8>::new_host(device, len, vk::BufferUsageFlags::TRANSFER_SRC)?;
            let mut image_info = base;
            image_info.usage |= vk::ImageUsageFlags::TRANSFER_DST;
            (image_info, Some(staging))
        } else {
            let image_info = base
                .with_tiling(vk::ImageTiling::LINEAR)
                .with_initial_layout(vk::ImageLayout::PREINITIALIZED)
                .with_memory_properties(HOST_MEMORY);
            (image_info, None)
        };

        let image = Image::new(device, image_info)?;
        let sampler = Arc::new(Sampler::linear_repeat(device, info.anisotropy)?);

        tracing::debug!(
            format = ?info.format,
            width = info.extent.width,
            height = info.extent.height,
            staged,
            "Created texture"
        );

        Ok(Self {
            device: Arc::clone(device),
            image,
            sampler,
            staging,
            info,
        })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.sampler
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    pub fn is_staged(&self) -> bool {
        self.staging.is_some()
    }

    /// Fill the texture through `generator` and record the transitions that
    /// leave it in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// The texture must still be in its initial layout, and `cmd` must be recording.
    pub fn set_image<F>(&self, cmd: vk::CommandBuffer, generator: F) -> Result<()>
    where
        F: FnOnce(&mut [u8], vk::Extent2D),
    {
        let extent = self.info.extent;
        let format = self.info.format;
        let device = self.device.handle();
        let image = self.image.handle();

        match &self.staging {
            Some(staging) => {
                let len = staging.count();
                staging
                    .memory()
                    .map_with(0, len, |dst| generator(dst, extent))?;

                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_offset(vk::Offset3D::default())
                    .image_extent(self.image.extent());

                unsafe {
                    set_image_layout(
                        device,
                        cmd,
                        image,
                        format,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    )?;
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging.handle(),
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                    set_image_layout(
                        device,
                        cmd,
                        image,
                        format,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )?;
                }
            }
            None => {
                self.write_linear(generator)?;
                unsafe {
                    set_image_layout(
                        device,
                        cmd,
                        image,
                        format,
                        vk::ImageLayout::PREINITIALIZED,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )?;
                }
            }
        }
        Ok(())
    }

    // Linear images may pad rows, so tightly packed texels are copied row by row.
    fn write_linear<F>(&self, generator: F) -> Result<()>
    where
        F: FnOnce(&mut [u8], vk::Extent2D),
    {
        let extent = self.info.extent;
        let texel = bytes_per_texel(self.info.format).unwrap_or(4);
        let row_bytes = extent.width as usize * texel;
        let rows = extent.height as usize;

        let subresource = vk::ImageSubresource::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .array_layer(0);
        let layout = unsafe {
            self.device
                .handle()
                .get_image_subresource_layout(self.image.handle(), subresource)
        };
        let row_pitch = layout.row_pitch as usize;
        let memory = self.image.memory();

        if row_pitch == row_bytes {
            return memory.map_with(layout.offset, row_bytes * rows, |dst| generator(dst, extent));
        }

        let mut packed = vec![0u8; row_bytes * rows];
        generator(&mut packed, extent);
        let span = row_pitch * rows.saturating_sub(1) + row_bytes;
        memory.map_with(layout.offset, span, |dst| {
            for (y, row) in packed.chunks_exact(row_bytes).enumerate() {
                dst[y * row_pitch..y * row_pitch + row_bytes].copy_from_slice(row);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(linear: vk::FormatFeatureFlags, optimal: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: linear,
            optimal_tiling_features: optimal,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    #[test]
    fn linear_support_avoids_staging() {
        let sampled = vk::FormatFeatureFlags::SAMPLED_IMAGE;
        let p = props(sampled, sampled);
        assert!(!needs_staging(&p, sampled, false).unwrap());
        assert!(needs_staging(&p, sampled, true).unwrap());
    }

    #[test]
    fn optimal_only_forces_staging() {
        let sampled = vk::FormatFeatureFlags::SAMPLED_IMAGE;
        let p = props(vk::FormatFeatureFlags::empty(), sampled);
        assert!(needs_staging(&p, sampled, false).unwrap());
    }

    #[test]
    fn unsupported_features_are_rejected() {
        let p = props(vk::FormatFeatureFlags::empty(), vk::FormatFeatureFlags::empty());
        let result = needs_staging(&p, vk::FormatFeatureFlags::SAMPLED_IMAGE, false);
        assert!(matches!(result, Err(GpuError::UnsupportedCapability(_))));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let extent = vk::Extent2D {
            width: 16,
            height: 16,
        };
        let mut pixels = vec![0u8; 16 * 16 * 4];
        checkerboard(&mut pixels, extent);

        let texel = |x: usize, y: usize| &pixels[(y * 16 + x) * 4..(y * 16 + x) * 4 + 4];
        assert_eq!(texel(0, 0), &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(texel(8, 0), &[0x00, 0x00, 0x00, 0xff]);
        assert_eq!(texel(0, 8), &[0x00, 0x00, 0x00, 0xff]);
        assert_eq!(texel(9, 9), &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(bytes_per_texel(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(bytes_per_texel(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(bytes_per_texel(vk::Format::D32_SFLOAT), None);
    }
}
