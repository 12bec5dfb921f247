//! Image layout transitions.

use crate::error::{GpuError, Result};
use crate::util::{has_stencil_component, DEPTH_FORMATS};
use ash::vk;

/// Access masks, stages and aspect for one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub aspect_mask: vk::ImageAspectFlags,
}

/// Aspect touched by a barrier on an image of `format`.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if DEPTH_FORMATS.contains(&format) {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn source_masks(old_layout: vk::ImageLayout) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    let masks = match old_layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::PREINITIALIZED => (vk::AccessFlags::HOST_WRITE, vk::PipelineStageFlags::HOST),
        vk::ImageLayout::GENERAL => (vk::AccessFlags::empty(), vk::PipelineStageFlags::HOST),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        }
        _ => return None,
    };
    Some(masks)
}

fn destination_masks(
    new_layout: vk::ImageLayout,
) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    let masks = match new_layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::GENERAL => (vk::AccessFlags::empty(), vk::PipelineStageFlags::HOST),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        }
        _ => return None,
    };
    Some(masks)
}

/// Derive the barrier parameters for moving an image of `format` between layouts.
pub fn transition_masks(
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<TransitionMasks> {
    let (src_access, src_stage) = source_masks(old_layout).ok_or_else(|| {
        GpuError::UnsupportedCapability(format!("layout transition from {old_layout:?}"))
    })?;
    let (dst_access, dst_stage) = destination_masks(new_layout).ok_or_else(|| {
        GpuError::UnsupportedCapability(format!("layout transition to {new_layout:?}"))
    })?;

    let aspect_mask = if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        aspect_for_format(format)
    };

    Ok(TransitionMasks {
        src_access,
        src_stage,
        dst_access,
        dst_stage,
        aspect_mask,
    })
}

/// Record a single image memory barrier moving `image` between layouts.
///
/// # Safety
/// `cmd` must be in the recording state and `image` must be valid.
pub unsafe fn set_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(format, old_layout, new_layout)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(masks.aspect_mask)
                .base_mip_level(0)
                .level_count(vk::REMAINING_MIP_LEVELS)
                .base_array_layer(0)
                .layer_count(vk::REMAINING_ARRAY_LAYERS),
        );

    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_texture_path() {
        let to_transfer = transition_masks(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(to_transfer.aspect_mask, vk::ImageAspectFlags::COLOR);

        let to_shader = transition_masks(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn preinitialized_path_waits_on_host() {
        let masks = transition_masks(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::HOST_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::HOST);
    }

    #[test]
    fn depth_stencil_aspect() {
        let with_stencil = transition_masks(
            vk::Format::D24_UNORM_S8_UINT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(
            with_stencil.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            with_stencil.dst_stage,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        );

        let depth_only = transition_masks(
            vk::Format::D32_SFLOAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(depth_only.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn stencil_aspect_follows_stencil_formats() {
        for format in DEPTH_FORMATS {
            let aspect = aspect_for_format(format);
            assert_eq!(
                aspect.contains(vk::ImageAspectFlags::STENCIL),
                has_stencil_component(format),
                "{format:?}"
            );
            assert!(aspect.contains(vk::ImageAspectFlags::DEPTH));
        }
        assert_eq!(
            aspect_for_format(vk::Format::D16_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn color_attachment_to_present() {
        let masks = transition_masks(
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(masks.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn unknown_layouts_are_rejected() {
        let result = transition_masks(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::UNDEFINED,
        );
        assert!(matches!(result, Err(GpuError::UnsupportedCapability(_))));
    }

    #[test]
    fn aspect_follows_format() {
        assert_eq!(
            aspect_for_format(vk::Format::D16_UNORM),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_format(vk::Format::B8G8R8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
    }
}
