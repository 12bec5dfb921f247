//! Descriptor set layouts, pools, sets and updates.

use crate::error::{GpuError, Result};
use crate::logical_device::LogicalDevice;
use ash::vk;
use std::sync::Arc;

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    pub immutable_samplers: Vec<vk::Sampler>,
    pub flags: vk::DescriptorBindingFlags,
}

impl DescriptorBinding {
    pub fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            count,
            stage_flags,
            immutable_samplers: Vec::new(),
            flags: vk::DescriptorBindingFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: vk::DescriptorBindingFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_immutable_samplers(mut self, samplers: Vec<vk::Sampler>) -> Self {
        self.immutable_samplers = samplers;
        self
    }

    /// Check that `len` descriptors starting at `array_offset` fit this binding.
    pub fn check_range(&self, array_offset: u32, len: usize) -> Result<()> {
        let end = u64::from(array_offset) + len as u64;
        if len == 0 || end > u64::from(self.count) {
            return Err(GpuError::InvalidArgument(format!(
                "write of {len} descriptors at offset {array_offset} does not fit binding {} ({} descriptors)",
                self.binding, self.count
            )));
        }
        Ok(())
    }
}

/// Descriptor set layout builder.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
    flags: vk::DescriptorSetLayoutCreateFlags,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    pub fn binding(
        self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.with_binding(DescriptorBinding::new(binding, descriptor_type, count, stage_flags))
    }

    pub fn with_binding(mut self, binding: DescriptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::SAMPLED_IMAGE, 1, stage_flags)
    }

    pub fn combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Add a storage image binding.
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    pub fn sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::SAMPLER, 1, stage_flags)
    }

    /// Set layout create flags, e.g. `UPDATE_AFTER_BIND_POOL`.
    pub fn flags(mut self, flags: vk::DescriptorSetLayoutCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Build the descriptor set layout.
    pub fn build(self, device: &Arc<LogicalDevice>) -> Result<Arc<DescriptorSetLayout>> {
        DescriptorSetLayout::new(device, self.bindings, self.flags)
    }
}

/// An immutable descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<LogicalDevice>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
    flags: vk::DescriptorSetLayoutCreateFlags,
}

impl DescriptorSetLayout {
    pub fn new(
        device: &Arc<LogicalDevice>,
        bindings: Vec<DescriptorBinding>,
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<Arc<Self>> {
        for (i, b) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|other| other.binding == b.binding) {
                return Err(GpuError::InvalidArgument(format!(
                    "duplicate descriptor binding {}",
                    b.binding
                )));
            }
        }

        let raw_bindings: Vec<_> = bindings
            .iter()
            .map(|b| {
                let mut raw = vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .stage_flags(b.stage_flags);
                if !b.immutable_samplers.is_empty() {
                    raw = raw.immutable_samplers(&b.immutable_samplers);
                }
                raw.descriptor_count(b.count)
            })
            .collect();
        let binding_flags: Vec<_> = bindings.iter().map(|b| b.flags).collect();

        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(flags)
            .bindings(&raw_bindings);
        if binding_flags.iter().any(|f| !f.is_empty()) {
            create_info = create_info.push_next(&mut flags_info);
        }

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        tracing::debug!(bindings = bindings.len(), ?flags, "Created descriptor set layout");

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            layout,
            bindings,
            flags,
        }))
    }

    /// Get the raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Look up a binding by its binding number.
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn flags(&self) -> vk::DescriptorSetLayoutCreateFlags {
        self.flags
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Default `max_sets`: one set per descriptor in the pool.
pub fn default_max_sets(sizes: &[vk::DescriptorPoolSize]) -> u32 {
    sizes
        .iter()
        .fold(0u32, |acc, size| acc.saturating_add(size.descriptor_count))
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    device: Arc<LogicalDevice>,
    pool: vk::DescriptorPool,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
}

impl DescriptorPool {
    /// Create a pool. `max_sets` defaults to the sum of all descriptor counts.
    pub fn new(
        device: &Arc<LogicalDevice>,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: Option<u32>,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<Arc<Self>> {
        if sizes.is_empty() {
            return Err(GpuError::InvalidArgument(
                "descriptor pool needs at least one pool size".to_string(),
            ));
        }
        let max_sets = max_sets.unwrap_or_else(|| default_max_sets(sizes));

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes)
            .flags(flags);
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        tracing::debug!(max_sets, ?flags, "Created descriptor pool");

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            pool,
            max_sets,
            flags,
        }))
    }

    /// Pool with `FREE_DESCRIPTOR_SET`, so sets free themselves when dropped.
    pub fn with_free_sets(
        device: &Arc<LogicalDevice>,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Arc<Self>> {
        Self::new(
            device,
            sizes,
            None,
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
        )
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn flags(&self) -> vk::DescriptorPoolCreateFlags {
        self.flags
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    /// Allocate one set with `layout`.
    pub fn allocate(self: &Arc<Self>, layout: &Arc<DescriptorSetLayout>) -> Result<DescriptorSet> {
        let mut sets = self.allocate_many(std::slice::from_ref(layout))?;
        sets.pop()
            .ok_or(GpuError::ResourceExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    /// Allocate one set per layout, in order.
    pub fn allocate_many(
        self: &Arc<Self>,
        layouts: &[Arc<DescriptorSetLayout>],
    ) -> Result<Vec<DescriptorSet>> {
        let raw_layouts: Vec<_> = layouts.iter().map(|l| l.handle()).collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&raw_layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets
            .into_iter()
            .zip(layouts)
            .map(|(set, layout)| DescriptorSet {
                pool: Arc::clone(self),
                layout: Arc::clone(layout),
                set,
            })
            .collect())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_descriptor_pool(self.pool, None) };
    }
}

/// Buffers written into consecutive array elements of one binding.
#[derive(Debug, Clone)]
pub struct WriteBufferSet {
    pub binding: u32,
    pub array_offset: u32,
    pub buffers: Vec<vk::Buffer>,
}

impl WriteBufferSet {
    pub fn new(binding: u32, buffers: Vec<vk::Buffer>) -> Self {
        Self {
            binding,
            array_offset: 0,
            buffers,
        }
    }

    pub fn at(mut self, array_offset: u32) -> Self {
        self.array_offset = array_offset;
        self
    }
}

/// Image views, with an optional sampler, written into one binding.
#[derive(Debug, Clone)]
pub struct WriteImageSet {
    pub binding: u32,
    pub array_offset: u32,
    pub views: Vec<vk::ImageView>,
    pub layout: vk::ImageLayout,
    pub sampler: Option<vk::Sampler>,
}

impl WriteImageSet {
    pub fn new(binding: u32, views: Vec<vk::ImageView>, layout: vk::ImageLayout) -> Self {
        Self {
            binding,
            array_offset: 0,
            views,
            layout,
            sampler: None,
        }
    }

    pub fn at(mut self, array_offset: u32) -> Self {
        self.array_offset = array_offset;
        self
    }

    pub fn with_sampler(mut self, sampler: vk::Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }
}

/// Standalone samplers written into one binding.
#[derive(Debug, Clone)]
pub struct WriteSamplerSet {
    pub binding: u32,
    pub array_offset: u32,
    pub samplers: Vec<vk::Sampler>,
}

/// A single descriptor update record.
#[derive(Debug, Clone)]
pub enum DescriptorWrite {
    Buffer(WriteBufferSet),
    Image(WriteImageSet),
    Sampler(WriteSamplerSet),
}

impl DescriptorWrite {
    pub fn binding(&self) -> u32 {
        match self {
            Self::Buffer(w) => w.binding,
            Self::Image(w) => w.binding,
            Self::Sampler(w) => w.binding,
        }
    }

    pub fn array_offset(&self) -> u32 {
        match self {
            Self::Buffer(w) => w.array_offset,
            Self::Image(w) => w.array_offset,
            Self::Sampler(w) => w.array_offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Buffer(w) => w.buffers.len(),
            Self::Image(w) => w.views.len(),
            Self::Sampler(w) => w.samplers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this record carries the data `descriptor_type` is read from.
    pub fn matches_type(&self, descriptor_type: vk::DescriptorType) -> bool {
        match self {
            Self::Buffer(_) => matches!(
                descriptor_type,
                vk::DescriptorType::UNIFORM_BUFFER
                    | vk::DescriptorType::STORAGE_BUFFER
                    | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                    | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            ),
            Self::Image(_) => matches!(
                descriptor_type,
                vk::DescriptorType::SAMPLED_IMAGE
                    | vk::DescriptorType::STORAGE_IMAGE
                    | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                    | vk::DescriptorType::INPUT_ATTACHMENT
            ),
            Self::Sampler(_) => descriptor_type == vk::DescriptorType::SAMPLER,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::Sampler(_) => "sampler",
        }
    }
}

/// Reject a record whose kind disagrees with the binding's descriptor type.
fn check_write_type(write: &DescriptorWrite, descriptor_type: vk::DescriptorType) -> Result<()> {
    if write.matches_type(descriptor_type) {
        Ok(())
    } else {
        Err(GpuError::InvalidArgument(format!(
            "{} write cannot target binding {} of type {descriptor_type:?}",
            write.kind(),
            write.binding()
        )))
    }
}

impl From<WriteBufferSet> for DescriptorWrite {
    fn from(write: WriteBufferSet) -> Self {
        Self::Buffer(write)
    }
}

impl From<WriteImageSet> for DescriptorWrite {
    fn from(write: WriteImageSet) -> Self {
        Self::Image(write)
    }
}

impl From<WriteSamplerSet> for DescriptorWrite {
    fn from(write: WriteSamplerSet) -> Self {
        Self::Sampler(write)
    }
}

enum WriteInfos {
    Buffers(Vec<vk::DescriptorBufferInfo>),
    Images(Vec<vk::DescriptorImageInfo>),
}

/// A descriptor set allocated from a [`DescriptorPool`].
///
/// The set keeps its pool and layout alive. It is freed on drop when the pool
/// allows it; otherwise it lives until the pool is destroyed.
pub struct DescriptorSet {
    pool: Arc<DescriptorPool>,
    layout: Arc<DescriptorSetLayout>,
    set: vk::DescriptorSet,
}

impl DescriptorSet {
    /// Get the raw set handle.
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }

    /// Apply `writes`. Descriptor types come from the layout.
    ///
    /// Buffers are written with offset 0 and `WHOLE_SIZE`.
    pub fn update(&self, writes: &[DescriptorWrite]) -> Result<()> {
        let mut resolved = Vec::with_capacity(writes.len());
        for write in writes {
            let binding = self.layout.binding(write.binding()).ok_or_else(|| {
                GpuError::InvalidArgument(format!(
                    "descriptor binding {} is not in the set layout",
                    write.binding()
                ))
            })?;
            check_write_type(write, binding.descriptor_type)?;
            binding.check_range(write.array_offset(), write.len())?;

            let infos = match write {
                DescriptorWrite::Buffer(w) => WriteInfos::Buffers(
                    w.buffers
                        .iter()
                        .map(|&buffer| {
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer)
                                .offset(0)
                                .range(vk::WHOLE_SIZE)
                        })
                        .collect(),
                ),
                DescriptorWrite::Image(w) => WriteInfos::Images(
                    w.views
                        .iter()
                        .map(|&view| {
                            vk::DescriptorImageInfo::default()
                                .image_view(view)
                                .image_layout(w.layout)
                                .sampler(w.sampler.unwrap_or_default())
                        })
                        .collect(),
                ),
                DescriptorWrite::Sampler(w) => WriteInfos::Images(
                    w.samplers
                        .iter()
                        .map(|&sampler| vk::DescriptorImageInfo::default().sampler(sampler))
                        .collect(),
                ),
            };
            resolved.push((write, binding.descriptor_type, infos));
        }

        let raw_writes: Vec<_> = resolved
            .iter()
            .map(|(write, descriptor_type, infos)| {
                let raw = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(write.binding())
                    .dst_array_element(write.array_offset())
                    .descriptor_type(*descriptor_type);
                match infos {
                    WriteInfos::Buffers(buffers) => raw.buffer_info(buffers),
                    WriteInfos::Images(images) => raw.image_info(images),
                }
            })
            .collect();

        unsafe { self.pool.device().handle().update_descriptor_sets(&raw_writes, &[]) };
        Ok(())
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if !self
            .pool
            .flags()
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return;
        }
        let result = unsafe {
            self.pool
                .device()
                .handle()
                .free_descriptor_sets(self.pool.handle(), &[self.set])
        };
        if let Err(e) = result {
            tracing::warn!("Failed to free descriptor set: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_sets_defaults_to_descriptor_total() {
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 3,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 5,
            },
        ];
        assert_eq!(default_max_sets(&sizes), 8);
        assert_eq!(default_max_sets(&[]), 0);
    }

    #[test]
    fn builder_collects_bindings_in_order() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .storage_buffer(2, vk::ShaderStageFlags::COMPUTE);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[2].count, 1);
    }

    #[test]
    fn write_ranges_must_fit_binding() {
        let binding = DescriptorBinding::new(
            0,
            vk::DescriptorType::STORAGE_BUFFER,
            4,
            vk::ShaderStageFlags::ALL,
        );
        assert!(binding.check_range(0, 4).is_ok());
        assert!(binding.check_range(3, 1).is_ok());
        assert!(binding.check_range(3, 2).is_err());
        assert!(binding.check_range(0, 0).is_err());
    }

    #[test]
    fn write_records_expose_target() {
        let write: DescriptorWrite = WriteImageSet::new(
            2,
            vec![vk::ImageView::null(); 3],
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .at(5)
        .into();
        assert_eq!(write.binding(), 2);
        assert_eq!(write.array_offset(), 5);
        assert_eq!(write.len(), 3);
    }

    #[test]
    fn write_kind_must_match_binding_type() {
        let buffers: DescriptorWrite = WriteBufferSet::new(0, vec![vk::Buffer::null()]).into();
        let images: DescriptorWrite = WriteImageSet::new(
            0,
            vec![vk::ImageView::null()],
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .into();
        let samplers: DescriptorWrite = WriteSamplerSet {
            binding: 0,
            array_offset: 0,
            samplers: vec![vk::Sampler::null()],
        }
        .into();

        assert!(check_write_type(&buffers, vk::DescriptorType::STORAGE_BUFFER).is_ok());
        assert!(check_write_type(&images, vk::DescriptorType::SAMPLED_IMAGE).is_ok());
        assert!(check_write_type(&images, vk::DescriptorType::STORAGE_IMAGE).is_ok());
        assert!(check_write_type(&samplers, vk::DescriptorType::SAMPLER).is_ok());

        assert!(matches!(
            check_write_type(&buffers, vk::DescriptorType::SAMPLED_IMAGE),
            Err(GpuError::InvalidArgument(_))
        ));
        assert!(matches!(
            check_write_type(&samplers, vk::DescriptorType::STORAGE_BUFFER),
            Err(GpuError::InvalidArgument(_))
        ));
        assert!(check_write_type(&images, vk::DescriptorType::UNIFORM_BUFFER).is_err());
    }
}
