//! The two ways the demo can render into the swapchain.

use std::sync::Arc;
use vkw_gpu::util::has_stencil_component;
use vkw_gpu::{
    vk, GpuError, Image, LogicalDevice, PipelineTarget, RenderPass, RenderPassInfo,
    RenderPassSingle, RenderingAttachment, Subpass, Swapchain,
};

const CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.2, 1.0];

pub enum CubePass {
    /// Dynamic rendering with per-frame layout transitions.
    Dynamic {
        pass: RenderPassSingle,
        color_format: vk::Format,
        depth_format: vk::Format,
    },
    /// A render pass with one framebuffer per swapchain image.
    Classic(RenderPass),
}

impl CubePass {
    pub fn dynamic(device: &Arc<LogicalDevice>, swapchain: &Swapchain, depth: &Image) -> Self {
        let mut pass = RenderPassSingle::new(device, swapchain.extent());

        for (&image, view) in swapchain.images().iter().zip(swapchain.image_views()) {
            pass.add_frame_color_attachments(vec![RenderingAttachment::swapchain_color(
                image,
                Arc::clone(view),
                CLEAR_COLOR,
            )]);
        }
        pass.set_depth_stencil_attachment(vec![RenderingAttachment::depth(
            depth.handle(),
            Arc::clone(depth.view()),
        )]);

        Self::Dynamic {
            pass,
            color_format: swapchain.format(),
            depth_format: depth.format(),
        }
    }

    pub fn classic(
        device: &Arc<LogicalDevice>,
        swapchain: &Swapchain,
        depth: &Image,
    ) -> vkw_gpu::Result<Self> {
        let color = vk::AttachmentDescription::default()
            .format(swapchain.format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
        let depth_attachment = vk::AttachmentDescription::default()
            .format(depth.format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let subpass = Subpass::graphics(
            vec![vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            Some(vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
        );
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        };

        let mut info = RenderPassInfo::new(swapchain.extent())
            .with_attachment(color)
            .with_attachment(depth_attachment)
            .with_subpass(subpass)
            .with_dependency(dependency)
            .with_clear_values(vec![
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: CLEAR_COLOR,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ]);
        for view in swapchain.image_views() {
            info = info.with_target(vec![Arc::clone(view), Arc::clone(depth.view())]);
        }

        Ok(Self::Classic(RenderPass::new(device, info)?))
    }

    /// What the graphics pipeline must be built against.
    pub fn pipeline_target(&self) -> PipelineTarget {
        match self {
            Self::Dynamic {
                color_format,
                depth_format,
                ..
            } => PipelineTarget::Dynamic {
                color_formats: vec![*color_format],
                depth_format: *depth_format,
                stencil_format: if has_stencil_component(*depth_format) {
                    *depth_format
                } else {
                    vk::Format::UNDEFINED
                },
            },
            Self::Classic(pass) => PipelineTarget::RenderPass {
                render_pass: pass.handle(),
                subpass: 0,
            },
        }
    }

    pub fn render_area(&self) -> vk::Rect2D {
        match self {
            Self::Dynamic { pass, .. } => pass.render_area(),
            Self::Classic(pass) => pass.render_area(),
        }
    }

    pub fn begin(&self, frame: usize, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        match self {
            Self::Dynamic { pass, .. } => pass.begin(frame, cmd),
            Self::Classic(pass) => pass.begin(frame, cmd),
        }
    }

    pub fn end(&self, frame: usize, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        match self {
            Self::Dynamic { pass, .. } => pass.end(frame, cmd),
            Self::Classic(pass) => {
                pass.end(cmd);
                Ok(())
            }
        }
    }
}
