//! Classic render passes with framebuffers, and dynamic rendering.

use crate::error::{GpuError, Result};
use crate::image::ImageView;
use crate::layout::set_image_layout;
use crate::logical_device::LogicalDevice;
use crate::util::has_stencil_component;
use ash::vk;
use std::sync::Arc;

/// One subpass of a classic render pass.
#[derive(Debug, Clone, Default)]
pub struct Subpass {
    pub bind_point: vk::PipelineBindPoint,
    pub color_attachments: Vec<vk::AttachmentReference>,
    pub resolve_attachments: Vec<vk::AttachmentReference>,
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
    pub input_attachments: Vec<vk::AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl Subpass {
    /// A graphics subpass writing `color` and, optionally, a depth attachment.
    pub fn graphics(
        color: Vec<vk::AttachmentReference>,
        depth_stencil: Option<vk::AttachmentReference>,
    ) -> Self {
        Self {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachments: color,
            depth_stencil_attachment: depth_stencil,
            ..Default::default()
        }
    }

    fn describe(&self) -> vk::SubpassDescription<'_> {
        let mut description = vk::SubpassDescription::default()
            .pipeline_bind_point(self.bind_point)
            .color_attachments(&self.color_attachments)
            .input_attachments(&self.input_attachments)
            .preserve_attachments(&self.preserve_attachments);
        if !self.resolve_attachments.is_empty() {
            description = description.resolve_attachments(&self.resolve_attachments);
        }
        if let Some(depth) = &self.depth_stencil_attachment {
            description = description.depth_stencil_attachment(depth);
        }
        description
    }
}

/// Classic render pass description plus its framebuffer targets.
#[derive(Clone)]
pub struct RenderPassInfo {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<Subpass>,
    pub dependencies: Vec<vk::SubpassDependency>,
    /// One group of views per framebuffer, in attachment order.
    pub targets: Vec<Vec<Arc<ImageView>>>,
    pub render_area: vk::Rect2D,
    pub clear_values: Vec<vk::ClearValue>,
}

impl RenderPassInfo {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            targets: Vec::new(),
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            clear_values: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: vk::AttachmentDescription) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_subpass(mut self, subpass: Subpass) -> Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn with_dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_target(mut self, views: Vec<Arc<ImageView>>) -> Self {
        self.targets.push(views);
        self
    }

    pub fn with_clear_values(mut self, clear_values: Vec<vk::ClearValue>) -> Self {
        self.clear_values = clear_values;
        self
    }
}

/// Every target group must supply exactly one view per attachment description.
pub fn validate_targets(attachment_count: usize, group_sizes: &[usize]) -> Result<()> {
    for (i, &size) in group_sizes.iter().enumerate() {
        if size != attachment_count {
            tracing::error!(group = i, views = size, attachment_count, "Framebuffer target mismatch");
            return Err(GpuError::InvalidArgument(format!(
                "framebuffer group {i} has {size} views, render pass has {attachment_count} attachments"
            )));
        }
    }
    Ok(())
}

/// A classic render pass with one framebuffer per target group.
pub struct RenderPass {
    device: Arc<LogicalDevice>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    targets: Vec<Vec<Arc<ImageView>>>,
    attachment_count: usize,
    render_area: vk::Rect2D,
    clear_values: Vec<vk::ClearValue>,
}

impl RenderPass {
    pub fn new(device: &Arc<LogicalDevice>, info: RenderPassInfo) -> Result<Self> {
        if info.subpasses.is_empty() {
            return Err(GpuError::InvalidArgument(
                "render pass needs at least one subpass".to_string(),
            ));
        }
        let group_sizes: Vec<_> = info.targets.iter().map(Vec::len).collect();
        validate_targets(info.attachments.len(), &group_sizes)?;

        let subpasses: Vec<_> = info.subpasses.iter().map(Subpass::describe).collect();
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&info.attachments)
            .subpasses(&subpasses)
            .dependencies(&info.dependencies);
        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        let mut pass = Self {
            device: Arc::clone(device),
            render_pass,
            framebuffers: Vec::new(),
            targets: Vec::new(),
            attachment_count: info.attachments.len(),
            render_area: info.render_area,
            clear_values: info.clear_values,
        };
        pass.rebuild_framebuffers(info.targets, info.render_area)?;

        tracing::debug!(
            attachments = pass.attachment_count,
            subpasses = subpasses.len(),
            framebuffers = pass.framebuffers.len(),
            "Created render pass"
        );
        Ok(pass)
    }

    /// Replace every framebuffer, e.g. after a swapchain resize.
    pub fn rebuild_framebuffers(
        &mut self,
        targets: Vec<Vec<Arc<ImageView>>>,
        render_area: vk::Rect2D,
    ) -> Result<()> {
        let group_sizes: Vec<_> = targets.iter().map(Vec::len).collect();
        validate_targets(self.attachment_count, &group_sizes)?;
        self.destroy_framebuffers();

        let raw = self.device.handle();
        for group in &targets {
            let views: Vec<_> = group.iter().map(|view| view.handle()).collect();
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&views)
                .width(render_area.extent.width)
                .height(render_area.extent.height)
                .layers(1);
            let framebuffer = unsafe { raw.create_framebuffer(&create_info, None)? };
            self.framebuffers.push(framebuffer);
        }

        self.targets = targets;
        self.render_area = render_area;
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        let raw = self.device.handle();
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { raw.destroy_framebuffer(framebuffer, None) };
        }
    }

    pub fn set_clear_values(&mut self, clear_values: Vec<vk::ClearValue>) {
        self.clear_values = clear_values;
    }

    /// Record a pass begin on the framebuffer for `frame`.
    pub fn begin(&self, frame: usize, cmd: vk::CommandBuffer) -> Result<()> {
        let framebuffer = *self.framebuffers.get(frame).ok_or_else(|| {
            GpuError::InvalidArgument(format!(
                "frame {frame} out of range ({} framebuffers)",
                self.framebuffers.len()
            ))
        })?;

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(self.render_area)
            .clear_values(&self.clear_values);
        unsafe {
            self.device
                .handle()
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.handle().cmd_end_render_pass(cmd) };
    }

    /// Get the raw render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn targets(&self) -> &[Vec<Arc<ImageView>>] {
        &self.targets
    }

    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe { self.device.handle().destroy_render_pass(self.render_pass, None) };
    }
}

/// The three layouts an attachment moves through in one dynamic pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLayouts {
    pub before: vk::ImageLayout,
    pub during: vk::ImageLayout,
    pub after: vk::ImageLayout,
}

impl AttachmentLayouts {
    /// Transition to record before rendering, if any.
    pub fn before_transition(&self) -> Option<(vk::ImageLayout, vk::ImageLayout)> {
        (self.before != self.during).then_some((self.before, self.during))
    }

    /// Transition to record after rendering, if any.
    pub fn after_transition(&self) -> Option<(vk::ImageLayout, vk::ImageLayout)> {
        (self.after != self.during).then_some((self.during, self.after))
    }
}

/// An attachment for dynamic rendering.
#[derive(Clone)]
pub struct RenderingAttachment {
    pub image: vk::Image,
    pub view: Arc<ImageView>,
    pub layouts: AttachmentLayouts,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearValue,
    pub resolve: Option<(Arc<ImageView>, vk::ImageLayout, vk::ResolveModeFlags)>,
}

impl RenderingAttachment {
    /// Attachment rendered in `layout`, cleared and stored.
    pub fn new(image: vk::Image, view: Arc<ImageView>, layout: vk::ImageLayout) -> Self {
        Self {
            image,
            view,
            layouts: AttachmentLayouts {
                before: layout,
                during: layout,
                after: layout,
            },
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue::default(),
            resolve: None,
        }
    }

    /// Swapchain color target: undefined before, present source after.
    pub fn swapchain_color(image: vk::Image, view: Arc<ImageView>, clear: [f32; 4]) -> Self {
        Self::new(image, view, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .with_before_layout(vk::ImageLayout::UNDEFINED)
            .with_after_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .with_clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            })
    }

    /// Depth target cleared to 1.0 and discarded afterwards.
    pub fn depth(image: vk::Image, view: Arc<ImageView>) -> Self {
        Self::new(image, view, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .with_before_layout(vk::ImageLayout::UNDEFINED)
            .with_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .with_clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            })
    }

    pub fn with_before_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.layouts.before = layout;
        self
    }

    pub fn with_after_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.layouts.after = layout;
        self
    }

    pub fn with_load_op(mut self, load_op: vk::AttachmentLoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_clear_value(mut self, clear_value: vk::ClearValue) -> Self {
        self.clear_value = clear_value;
        self
    }

    pub fn with_resolve(
        mut self,
        view: Arc<ImageView>,
        layout: vk::ImageLayout,
        mode: vk::ResolveModeFlags,
    ) -> Self {
        self.resolve = Some((view, layout, mode));
        self
    }

    fn info(&self) -> vk::RenderingAttachmentInfo<'static> {
        let mut info = vk::RenderingAttachmentInfo::default()
            .image_view(self.view.handle())
            .image_layout(self.layouts.during)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(self.clear_value);
        if let Some((view, layout, mode)) = &self.resolve {
            info = info
                .resolve_mode(*mode)
                .resolve_image_view(view.handle())
                .resolve_image_layout(*layout);
        }
        info
    }

    fn transition(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        transition: Option<(vk::ImageLayout, vk::ImageLayout)>,
    ) -> Result<()> {
        if let Some((old, new)) = transition {
            unsafe { set_image_layout(device, cmd, self.image, self.view.format(), old, new)? };
        }
        Ok(())
    }
}

/// A single-subpass pass using dynamic rendering; no pass object or framebuffers.
pub struct RenderPassSingle {
    device: Arc<LogicalDevice>,
    render_area: vk::Rect2D,
    color_attachments: Vec<Vec<RenderingAttachment>>,
    depth_stencil_attachments: Vec<RenderingAttachment>,
}

impl RenderPassSingle {
    pub fn new(device: &Arc<LogicalDevice>, extent: vk::Extent2D) -> Self {
        Self {
            device: Arc::clone(device),
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            color_attachments: Vec::new(),
            depth_stencil_attachments: Vec::new(),
        }
    }

    /// Add the color attachments of the next frame.
    pub fn add_frame_color_attachments(&mut self, attachments: Vec<RenderingAttachment>) {
        self.color_attachments.push(attachments);
    }

    /// Depth-stencil attachments, one per frame; a single entry is shared by every frame.
    pub fn set_depth_stencil_attachment(&mut self, attachments: Vec<RenderingAttachment>) {
        self.depth_stencil_attachments = attachments;
    }

    /// Drop every attachment and set a new render area, e.g. after a resize.
    pub fn reset(&mut self, extent: vk::Extent2D) {
        self.color_attachments.clear();
        self.depth_stencil_attachments.clear();
        self.render_area.extent = extent;
    }

    pub fn frame_count(&self) -> usize {
        self.color_attachments.len()
    }

    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    fn frame(&self, frame: usize) -> Result<(&[RenderingAttachment], Option<&RenderingAttachment>)> {
        let colors = self.color_attachments.get(frame).ok_or_else(|| {
            GpuError::InvalidArgument(format!(
                "frame {frame} out of range ({} frames)",
                self.color_attachments.len()
            ))
        })?;
        let depth = self
            .depth_stencil_attachments
            .get(frame)
            .or_else(|| match self.depth_stencil_attachments.as_slice() {
                [shared] => Some(shared),
                _ => None,
            });
        Ok((colors, depth))
    }

    /// Transition attachments into their rendering layouts and begin rendering.
    pub fn begin(&self, frame: usize, cmd: vk::CommandBuffer) -> Result<()> {
        let (colors, depth) = self.frame(frame)?;
        let device = self.device.handle();

        for attachment in colors.iter().chain(depth) {
            attachment.transition(device, cmd, attachment.layouts.before_transition())?;
        }

        let color_infos: Vec<_> = colors.iter().map(RenderingAttachment::info).collect();
        let depth_info = depth.map(RenderingAttachment::info);
        let stencil = depth.filter(|d| has_stencil_component(d.view.format()));
        let stencil_info = stencil.map(RenderingAttachment::info);

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(info) = &depth_info {
            rendering_info = rendering_info.depth_attachment(info);
        }
        if let Some(info) = &stencil_info {
            rendering_info = rendering_info.stencil_attachment(info);
        }

        unsafe { device.cmd_begin_rendering(cmd, &rendering_info) };
        Ok(())
    }

    /// End rendering and move attachments into their final layouts.
    pub fn end(&self, frame: usize, cmd: vk::CommandBuffer) -> Result<()> {
        let (colors, depth) = self.frame(frame)?;
        let device = self.device.handle();

        unsafe { device.cmd_end_rendering(cmd) };
        for attachment in colors.iter().chain(depth) {
            attachment.transition(device, cmd, attachment.layouts.after_transition())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_groups_must_match_attachments() {
        assert!(validate_targets(2, &[2, 2, 2]).is_ok());
        assert!(validate_targets(2, &[]).is_ok());
        assert!(matches!(
            validate_targets(2, &[2, 1]),
            Err(GpuError::InvalidArgument(_))
        ));
    }

    #[test]
    fn swapchain_attachment_layouts() {
        let layouts = AttachmentLayouts {
            before: vk::ImageLayout::UNDEFINED,
            during: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            after: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert_eq!(
            layouts.before_transition(),
            Some((
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            ))
        );
        assert_eq!(
            layouts.after_transition(),
            Some((
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR
            ))
        );
    }

    #[test]
    fn matching_layouts_need_no_barrier() {
        let layouts = AttachmentLayouts {
            before: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            during: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            after: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        assert_eq!(layouts.before_transition(), None);
        assert_eq!(layouts.after_transition(), None);
    }

    #[test]
    fn graphics_subpass_description() {
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
        let description = subpass.describe();
        assert_eq!(description.pipeline_bind_point, vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(description.color_attachment_count, 1);
        assert!(!description.p_depth_stencil_attachment.is_null());
        assert!(description.p_resolve_attachments.is_null());
    }
}
