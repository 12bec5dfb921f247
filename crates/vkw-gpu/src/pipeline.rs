//! Shader stages, pipeline layouts, caches and graphics pipelines.

use crate::descriptors::DescriptorSetLayout;
use crate::error::{GpuError, Result};
use crate::logical_device::LogicalDevice;
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

/// Specialization constants for one shader stage.
#[derive(Debug, Clone, Default)]
pub struct Specialization {
    pub entries: Vec<vk::SpecializationMapEntry>,
    pub data: Vec<u8>,
}

/// A shader module with its stage, entry point and specialization data.
pub struct ShaderStage {
    device: Arc<LogicalDevice>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    specialization: Option<Specialization>,
}

impl ShaderStage {
    /// Create a module from SPIR-V words with entry point `main`.
    pub fn new(device: &Arc<LogicalDevice>, stage: vk::ShaderStageFlags, spirv: &[u32]) -> Result<Self> {
        if spirv.is_empty() {
            return Err(GpuError::InvalidArgument(format!("empty SPIR-V for {stage:?}")));
        }
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        Ok(Self {
            device: Arc::clone(device),
            module,
            stage,
            entry_point: c"main".to_owned(),
            specialization: None,
        })
    }

    pub fn with_entry_point(mut self, name: &str) -> Result<Self> {
        self.entry_point = CString::new(name)
            .map_err(|e| GpuError::InvalidArgument(format!("entry point {name:?}: {e}")))?;
        Ok(self)
    }

    pub fn with_specialization(mut self, specialization: Specialization) -> Self {
        self.specialization = Some(specialization);
        self
    }

    /// Get the raw module handle.
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

impl Drop for ShaderStage {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_shader_module(self.module, None) };
    }
}

/// An in-memory pipeline cache.
pub struct PipelineCache {
    device: Arc<LogicalDevice>,
    cache: vk::PipelineCache,
}

impl PipelineCache {
    /// Create a cache, optionally seeded with data from [`PipelineCache::data`].
    pub fn new(device: &Arc<LogicalDevice>, initial_data: &[u8]) -> Result<Self> {
        let create_info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);
        let cache = unsafe { device.handle().create_pipeline_cache(&create_info, None)? };
        Ok(Self {
            device: Arc::clone(device),
            cache,
        })
    }

    /// Get the raw cache handle.
    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Serialized cache contents.
    pub fn data(&self) -> Result<Vec<u8>> {
        let data = unsafe { self.device.handle().get_pipeline_cache_data(self.cache)? };
        Ok(data)
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline_cache(self.cache, None) };
    }
}

/// Descriptor set layouts and push-constant ranges of a pipeline.
pub struct PipelineLayout {
    device: Arc<LogicalDevice>,
    layout: vk::PipelineLayout,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    pub fn new(
        device: &Arc<LogicalDevice>,
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        push_constant_ranges: Vec<vk::PushConstantRange>,
    ) -> Result<Arc<Self>> {
        let raw_layouts: Vec<_> = set_layouts.iter().map(|l| l.handle()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&raw_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            layout,
            set_layouts,
            push_constant_ranges,
        }))
    }

    /// Get the raw layout handle.
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Record a descriptor set bind with this layout.
    pub fn bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                self.layout,
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline_layout(self.layout, None) };
    }
}

/// What a graphics pipeline renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineTarget {
    RenderPass {
        render_pass: vk::RenderPass,
        subpass: u32,
    },
    /// Dynamic rendering; `UNDEFINED` means no depth or stencil attachment.
    Dynamic {
        color_formats: Vec<vk::Format>,
        depth_format: vk::Format,
        stencil_format: vk::Format,
    },
}

impl PipelineTarget {
    pub fn dynamic(color_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> Self {
        Self::Dynamic {
            color_formats,
            depth_format: depth_format.unwrap_or(vk::Format::UNDEFINED),
            stencil_format: vk::Format::UNDEFINED,
        }
    }
}

/// Color blend state that writes RGBA without blending.
pub fn opaque_color_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// Graphics pipeline configuration.
pub struct GraphicsPipelineInfo<'a> {
    pub stages: Vec<&'a ShaderStage>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub target: PipelineTarget,
    pub cache: Option<&'a PipelineCache>,
}

impl<'a> GraphicsPipelineInfo<'a> {
    pub fn new(target: PipelineTarget, front_face: vk::FrontFace) -> Self {
        Self {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport_count: 1,
            scissor_count: 1,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face,
            line_width: 1.0,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            depth_compare_op: vk::CompareOp::LESS,
            color_blend_attachments: Vec::new(),
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            target,
            cache: None,
        }
    }

    pub fn with_stage(mut self, stage: &'a ShaderStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    /// Enable depth testing with `compare_op`.
    pub fn with_depth(mut self, write: bool, compare_op: vk::CompareOp) -> Self {
        self.depth_test = true;
        self.depth_write = write;
        self.depth_compare_op = compare_op;
        self
    }

    pub fn with_color_blend_attachment(
        mut self,
        attachment: vk::PipelineColorBlendAttachmentState,
    ) -> Self {
        self.color_blend_attachments.push(attachment);
        self
    }

    pub fn with_dynamic_states(mut self, states: Vec<vk::DynamicState>) -> Self {
        self.dynamic_states = states;
        self
    }

    pub fn with_cache(mut self, cache: &'a PipelineCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Checks that do not need the driver.
    pub fn validate(&self) -> Result<()> {
        if self.stages.len() < 2 {
            return Err(GpuError::InvalidArgument(format!(
                "graphics pipeline needs at least two shader stages, got {}",
                self.stages.len()
            )));
        }
        if let PipelineTarget::Dynamic { color_formats, .. } = &self.target {
            if color_formats.len() != self.color_blend_attachments.len() {
                return Err(GpuError::InvalidArgument(format!(
                    "{} color formats but {} blend attachments",
                    color_formats.len(),
                    self.color_blend_attachments.len()
                )));
            }
        }
        Ok(())
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    device: Arc<LogicalDevice>,
    pipeline: vk::Pipeline,
    layout: Arc<PipelineLayout>,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<LogicalDevice>,
        layout: Arc<PipelineLayout>,
        info: &GraphicsPipelineInfo<'_>,
    ) -> Result<Self> {
        info.validate()?;

        let specializations: Vec<_> = info
            .stages
            .iter()
            .map(|stage| {
                stage.specialization.as_ref().map(|s| {
                    vk::SpecializationInfo::default()
                        .map_entries(&s.entries)
                        .data(&s.data)
                })
            })
            .collect();
        let stages: Vec<_> = info
            .stages
            .iter()
            .zip(&specializations)
            .map(|(stage, specialization)| {
                let create_info = vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(&stage.entry_point);
                match specialization {
                    Some(s) => create_info.specialization_info(s),
                    None => create_info,
                }
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&info.vertex_bindings)
            .vertex_attribute_descriptions(&info.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(info.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(info.viewport_count)
            .scissor_count(info.scissor_count);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(info.polygon_mode)
            .cull_mode(info.cull_mode)
            .front_face(info.front_face)
            .depth_bias_enable(false)
            .line_width(info.line_width);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(info.samples)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(info.depth_test)
            .depth_write_enable(info.depth_write)
            .depth_compare_op(info.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&info.color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&info.dynamic_states);

        let mut create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle());

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default();
        match &info.target {
            PipelineTarget::RenderPass {
                render_pass,
                subpass,
            } => {
                create_info = create_info.render_pass(*render_pass).subpass(*subpass);
            }
            PipelineTarget::Dynamic {
                color_formats,
                depth_format,
                stencil_format,
            } => {
                rendering_info = rendering_info
                    .color_attachment_formats(color_formats)
                    .depth_attachment_format(*depth_format)
                    .stencil_attachment_format(*stencil_format);
                create_info = create_info.push_next(&mut rendering_info);
            }
        }

        let cache = info.cache.map_or(vk::PipelineCache::null(), PipelineCache::handle);
        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(cache, &[create_info], None)
                .map_err(|(_, e)| GpuError::from(e))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))?;

        tracing::debug!(stages = info.stages.len(), "Created graphics pipeline");

        Ok(Self {
            device: Arc::clone(device),
            pipeline,
            layout,
        })
    }

    /// Get the raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    /// Bind at the graphics bind point.
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    /// Bind descriptor sets through this pipeline's layout.
    pub fn bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.layout.bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            first_set,
            sets,
            dynamic_offsets,
        );
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline(self.pipeline, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let info = GraphicsPipelineInfo::new(
            PipelineTarget::dynamic(vec![vk::Format::B8G8R8A8_SRGB], None),
            vk::FrontFace::CLOCKWISE,
        );
        assert_eq!(info.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!((info.viewport_count, info.scissor_count), (1, 1));
        assert_eq!(info.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(info.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(info.front_face, vk::FrontFace::CLOCKWISE);
        assert!((info.line_width - 1.0).abs() < f32::EPSILON);
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_1);
        assert!(!info.depth_test);
        assert_eq!(
            info.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
        assert!(info.cache.is_none());
    }

    #[test]
    fn needs_two_stages() {
        let info = GraphicsPipelineInfo::new(
            PipelineTarget::RenderPass {
                render_pass: vk::RenderPass::null(),
                subpass: 0,
            },
            vk::FrontFace::COUNTER_CLOCKWISE,
        );
        assert!(matches!(info.validate(), Err(GpuError::InvalidArgument(_))));
    }

    #[test]
    fn dynamic_target_without_depth() {
        match PipelineTarget::dynamic(vec![vk::Format::R8G8B8A8_UNORM], None) {
            PipelineTarget::Dynamic {
                depth_format,
                stencil_format,
                ..
            } => {
                assert_eq!(depth_format, vk::Format::UNDEFINED);
                assert_eq!(stencil_format, vk::Format::UNDEFINED);
            }
            PipelineTarget::RenderPass { .. } => unreachable!(),
        }
    }

    #[test]
    fn depth_toggle() {
        let info = GraphicsPipelineInfo::new(
            PipelineTarget::dynamic(Vec::new(), Some(vk::Format::D32_SFLOAT)),
            vk::FrontFace::CLOCKWISE,
        )
        .with_depth(true, vk::CompareOp::LESS_OR_EQUAL);
        assert!(info.depth_test && info.depth_write);
        assert_eq!(info.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
    }
}
