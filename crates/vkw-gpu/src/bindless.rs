//! Bindless descriptor management.
//!
//! One large descriptor set holds four arrays (storage buffers, sampled
//! images, storage images and samplers) at fixed bindings. Resources created
//! through the manager claim a slot in the matching array and release it when
//! the last owner drops them. Shaders index the arrays with [`Handle::index`].

use crate::buffer::Buffer;
use crate::descriptors::{
    DescriptorBinding, DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorWrite,
    WriteBufferSet, WriteImageSet, WriteSamplerSet,
};
use crate::error::{GpuError, Result};
use crate::image::{Image, ImageInfo, Sampler};
use crate::logical_device::LogicalDevice;
use ash::vk;
use bytemuck::Pod;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Index into a bindless array plus a generation that detects stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub index: u32,
    pub generation: u32,
}

impl Handle {
    /// Pack as `generation << 32 | index`.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Index/generation allocator for one bindless array.
///
/// Released indices are handed out again before fresh ones, with their
/// generation bumped so old handles stop validating.
#[derive(Debug, Clone)]
pub struct HandleTable {
    generations: Vec<u32>,
    live: Vec<bool>,
    free: VecDeque<u32>,
    capacity: u32,
    live_count: usize,
}

impl HandleTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            generations: Vec::new(),
            live: Vec::new(),
            free: VecDeque::new(),
            capacity,
            live_count: 0,
        }
    }

    /// Claim a free handle, or `None` when the table is full.
    pub fn allocate(&mut self) -> Option<Handle> {
        let index = match self.free.pop_front() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.generations.len()).ok()?;
                if index >= self.capacity {
                    return None;
                }
                self.generations.push(0);
                self.live.push(false);
                index
            }
        };

        self.live[index as usize] = true;
        self.live_count += 1;
        Some(Handle {
            index,
            generation: self.generations[index as usize],
        })
    }

    /// Return a handle to the table. Stale or unknown handles are ignored.
    pub fn release(&mut self, handle: Handle) -> bool {
        if !self.is_valid(handle) {
            return false;
        }
        let slot = handle.index as usize;
        self.live[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push_back(handle.index);
        self.live_count -= 1;
        true
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        let slot = handle.index as usize;
        slot < self.live.len() && self.live[slot] && self.generations[slot] == handle.generation
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// The four bindless arrays, numbered by their binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindlessSlot {
    StorageBuffer = 0,
    SampledImage = 1,
    StorageImage = 2,
    Sampler = 3,
}

impl BindlessSlot {
    pub const ALL: [Self; 4] = [
        Self::StorageBuffer,
        Self::SampledImage,
        Self::StorageImage,
        Self::Sampler,
    ];

    pub fn binding(self) -> u32 {
        self as u32
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

/// Array sizes of the bindless set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindlessCapacities {
    pub storage_buffers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub samplers: u32,
}

impl Default for BindlessCapacities {
    fn default() -> Self {
        Self {
            storage_buffers: 131_072,
            sampled_images: 131_072,
            storage_images: 32_768,
            samplers: 1024,
        }
    }
}

impl BindlessCapacities {
    pub fn get(&self, slot: BindlessSlot) -> u32 {
        match slot {
            BindlessSlot::StorageBuffer => self.storage_buffers,
            BindlessSlot::SampledImage => self.sampled_images,
            BindlessSlot::StorageImage => self.storage_images,
            BindlessSlot::Sampler => self.samplers,
        }
    }

    /// Layout bindings for the four arrays.
    pub fn bindings(&self) -> Vec<DescriptorBinding> {
        BindlessSlot::ALL
            .into_iter()
            .map(|slot| {
                DescriptorBinding::new(
                    slot.binding(),
                    slot.descriptor_type(),
                    self.get(slot),
                    vk::ShaderStageFlags::ALL,
                )
                .with_flags(
                    vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                        | vk::DescriptorBindingFlags::PARTIALLY_BOUND,
                )
            })
            .collect()
    }

    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        BindlessSlot::ALL
            .into_iter()
            .map(|slot| vk::DescriptorPoolSize {
                ty: slot.descriptor_type(),
                descriptor_count: self.get(slot),
            })
            .collect()
    }
}

type WeakResource = Weak<dyn Any + Send + Sync>;

struct SlotState {
    table: HandleTable,
    resources: HashMap<Handle, WeakResource>,
}

/// A resource registered in the bindless set.
///
/// Dropping the last `Arc` releases the handle back to its table.
pub struct Indexed<R> {
    resource: R,
    handle: Handle,
    slot: BindlessSlot,
    manager: Arc<BindlessDescriptorManager>,
}

impl<R> Indexed<R> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Array index to use in shaders.
    pub fn index(&self) -> u32 {
        self.handle.index
    }

    pub fn slot(&self) -> BindlessSlot {
        self.slot
    }
}

impl<R> Deref for Indexed<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> Drop for Indexed<R> {
    fn drop(&mut self) {
        self.manager.release(self.slot, self.handle);
    }
}

/// Storage-buffer write for `handle`.
fn storage_buffer_write(handle: Handle, buffer: vk::Buffer) -> DescriptorWrite {
    WriteBufferSet::new(BindlessSlot::StorageBuffer.binding(), vec![buffer])
        .at(handle.index)
        .into()
}

fn image_write(
    slot: BindlessSlot,
    handle: Handle,
    view: vk::ImageView,
    layout: vk::ImageLayout,
) -> DescriptorWrite {
    WriteImageSet::new(slot.binding(), vec![view], layout)
        .at(handle.index)
        .into()
}

fn sampler_write(handle: Handle, sampler: vk::Sampler) -> DescriptorWrite {
    WriteSamplerSet {
        binding: BindlessSlot::Sampler.binding(),
        array_offset: handle.index,
        samplers: vec![sampler],
    }
    .into()
}

/// Owner of the bindless pool, layout and set.
pub struct BindlessDescriptorManager {
    device: Arc<LogicalDevice>,
    set: Mutex<DescriptorSet>,
    layout: Arc<DescriptorSetLayout>,
    capacities: BindlessCapacities,
    slots: [Mutex<SlotState>; 4],
}

impl BindlessDescriptorManager {
    /// Create the bindless set. The device needs [`Self::required_features`].
    pub fn new(device: &Arc<LogicalDevice>, capacities: BindlessCapacities) -> Result<Arc<Self>> {
        let pool = DescriptorPool::new(
            device,
            &capacities.pool_sizes(),
            Some(1),
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
        )?;
        let layout = DescriptorSetLayout::new(
            device,
            capacities.bindings(),
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
        )?;
        let set = pool.allocate(&layout)?;

        tracing::info!(
            storage_buffers = capacities.storage_buffers,
            sampled_images = capacities.sampled_images,
            storage_images = capacities.storage_images,
            samplers = capacities.samplers,
            "Created bindless descriptor set"
        );

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            set: Mutex::new(set),
            layout,
            capacities,
            slots: BindlessSlot::ALL.map(|slot| {
                Mutex::new(SlotState {
                    table: HandleTable::new(capacities.get(slot)),
                    resources: HashMap::new(),
                })
            }),
        }))
    }

    /// Vulkan 1.2 features the bindless set relies on.
    pub fn required_features() -> vk::PhysicalDeviceVulkan12Features<'static> {
        vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
    }

    /// Raw handle of the bindless set.
    pub fn set(&self) -> vk::DescriptorSet {
        self.set.lock().handle()
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn capacities(&self) -> BindlessCapacities {
        self.capacities
    }

    fn slot(&self, slot: BindlessSlot) -> &Mutex<SlotState> {
        &self.slots[slot as usize]
    }

    fn claim(&self, slot: BindlessSlot) -> Result<Handle> {
        self.slot(slot).lock().table.allocate().ok_or_else(|| {
            tracing::error!(?slot, capacity = self.capacities.get(slot), "Bindless array is full");
            GpuError::ResourceExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
        })
    }

    fn release(&self, slot: BindlessSlot, handle: Handle) {
        let mut state = self.slot(slot).lock();
        state.resources.remove(&handle);
        state.table.release(handle);
    }

    /// Claim a handle, wrap `resource`, write its descriptor and record it.
    fn register<R, W>(
        self: &Arc<Self>,
        slot: BindlessSlot,
        resource: R,
        write: W,
    ) -> Result<Arc<Indexed<R>>>
    where
        R: Send + Sync + 'static,
        W: FnOnce(&R, Handle) -> DescriptorWrite,
    {
        let handle = self.claim(slot)?;
        let indexed = Arc::new(Indexed {
            resource,
            handle,
            slot,
            manager: Arc::clone(self),
        });

        // On failure `indexed` drops here and gives the handle back.
        self.set.lock().update(&[write(&indexed.resource, handle)])?;

        let erased: Arc<dyn Any + Send + Sync> = indexed.clone();
        self.slot(slot)
            .lock()
            .resources
            .insert(handle, Arc::downgrade(&erased));

        tracing::debug!(?slot, index = handle.index, generation = handle.generation, "Registered bindless resource");
        Ok(indexed)
    }

    /// Create a storage buffer and register it. `usage` must include `STORAGE_BUFFER`.
    pub fn create_storage_buffer<T: Pod + Send + Sync>(
        self: &Arc<Self>,
        count: usize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Arc<Indexed<Buffer<T>>>> {
        if !usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            return Err(GpuError::InvalidArgument(format!(
                "bindless storage buffer needs STORAGE_BUFFER usage, got {usage:?}"
            )));
        }
        let buffer = Buffer::<T>::new(&self.device, count, usage, memory_properties)?;
        self.register(BindlessSlot::StorageBuffer, buffer, |buffer, handle| {
            storage_buffer_write(handle, buffer.handle())
        })
    }

    /// Create an image and register its view as a sampled image.
    pub fn create_sampled_image(self: &Arc<Self>, info: ImageInfo) -> Result<Arc<Indexed<Image>>> {
        let image = Image::new(&self.device, info)?;
        self.register(BindlessSlot::SampledImage, image, |image, handle| {
            image_write(
                BindlessSlot::SampledImage,
                handle,
                image.view().handle(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })
    }

    /// Create an image with `STORAGE` usage and register it in `GENERAL` layout.
    pub fn create_storage_image(self: &Arc<Self>, info: ImageInfo) -> Result<Arc<Indexed<Image>>> {
        let mut info = info;
        info.usage |= vk::ImageUsageFlags::STORAGE;
        let image = Image::new(&self.device, info)?;
        self.register(BindlessSlot::StorageImage, image, |image, handle| {
            image_write(
                BindlessSlot::StorageImage,
                handle,
                image.view().handle(),
                vk::ImageLayout::GENERAL,
            )
        })
    }

    pub fn create_sampler(
        self: &Arc<Self>,
        create_info: &vk::SamplerCreateInfo<'_>,
    ) -> Result<Arc<Indexed<Sampler>>> {
        let sampler = Sampler::new(&self.device, create_info)?;
        self.register(BindlessSlot::Sampler, sampler, |sampler, handle| {
            sampler_write(handle, sampler.handle())
        })
    }

    /// Whether `handle` currently names a live resource in `slot`.
    pub fn is_live(&self, slot: BindlessSlot, handle: Handle) -> bool {
        self.slot(slot).lock().table.is_valid(handle)
    }

    pub fn live_count(&self, slot: BindlessSlot) -> usize {
        self.slot(slot).lock().table.live_count()
    }

    /// Look up a live resource of type `R`.
    pub fn get<R: Send + Sync + 'static>(
        &self,
        slot: BindlessSlot,
        handle: Handle,
    ) -> Option<Arc<Indexed<R>>> {
        let erased = self.slot(slot).lock().resources.get(&handle)?.upgrade()?;
        erased.downcast::<Indexed<R>>().ok()
    }

    /// Look up a live storage buffer with element type `T`.
    pub fn get_storage_buffer<T: Pod + Send + Sync>(
        &self,
        handle: Handle,
    ) -> Option<Arc<Indexed<Buffer<T>>>> {
        self.get(BindlessSlot::StorageBuffer, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_index_is_reused_with_new_generation() {
        let mut table = HandleTable::new(16);
        let handles: Vec<_> = (0..4).map(|_| table.allocate().unwrap()).collect();
        let indices: Vec<_> = handles.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(handles.iter().all(|h| h.generation == 0));

        assert!(table.release(handles[2]));
        let reused = table.allocate().unwrap();
        assert_eq!(reused.index, 2);
        assert_eq!(reused.generation, 1);
        assert!(!table.is_valid(handles[2]));
        assert!(table.is_valid(reused));
    }

    #[test]
    fn live_count_tracks_creates_and_releases() {
        let mut table = HandleTable::new(64);
        let handles: Vec<_> = (0..10).map(|_| table.allocate().unwrap()).collect();
        for handle in handles.iter().step_by(3) {
            assert!(table.release(*handle));
        }
        assert_eq!(table.live_count(), 10 - 4);

        // Double release is ignored.
        assert!(!table.release(handles[0]));
        assert_eq!(table.live_count(), 6);
    }

    #[test]
    fn table_respects_capacity() {
        let mut table = HandleTable::new(2);
        let first = table.allocate().unwrap();
        assert!(table.allocate().is_some());
        assert!(table.allocate().is_none());

        table.release(first);
        assert_eq!(table.allocate().map(|h| h.index), Some(0));
    }

    #[test]
    fn handle_bits() {
        let handle = Handle {
            index: 7,
            generation: 3,
        };
        assert_eq!(handle.to_bits(), (3 << 32) | 7);
        assert_eq!(Handle::from_bits(handle.to_bits()), handle);
    }

    #[test]
    fn writes_target_handle_index() {
        let handle = Handle {
            index: 42,
            generation: 5,
        };
        let buffer = storage_buffer_write(handle, vk::Buffer::null());
        assert_eq!(buffer.binding(), 0);
        assert_eq!(buffer.array_offset(), 42);

        let image = image_write(
            BindlessSlot::StorageImage,
            handle,
            vk::ImageView::null(),
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(image.binding(), 2);
        assert_eq!(image.array_offset(), 42);

        let sampler = sampler_write(handle, vk::Sampler::null());
        assert_eq!(sampler.binding(), 3);
        assert_eq!(sampler.array_offset(), 42);
    }

    #[test]
    fn layout_bindings_are_update_after_bind() {
        let capacities = BindlessCapacities::default();
        let bindings = capacities.bindings();
        assert_eq!(bindings.len(), 4);
        for (slot, binding) in BindlessSlot::ALL.iter().zip(&bindings) {
            assert_eq!(binding.binding, slot.binding());
            assert_eq!(binding.count, capacities.get(*slot));
            assert!(binding
                .flags
                .contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND));
            assert!(binding
                .flags
                .contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
        }
    }
}
