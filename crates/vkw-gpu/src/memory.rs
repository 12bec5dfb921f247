//! Device memory allocations.
//!
//! Every buffer and image owns exactly one allocation, bound at offset 0.

use crate::error::{GpuError, Result};
use crate::logical_device::LogicalDevice;
use ash::vk;
use std::sync::Arc;

/// Host-visible, host-coherent memory, the default for host uploads.
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A single `vkAllocateMemory` allocation.
pub struct DeviceMemory {
    device: Arc<LogicalDevice>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type_index: u32,
    properties: vk::MemoryPropertyFlags,
}

impl DeviceMemory {
    /// Allocate memory satisfying `requirements` with at least `properties`.
    pub fn allocate(
        device: &Arc<LogicalDevice>,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let memory_type_index =
            device.find_memory_type(requirements.memory_type_bits, properties)?;
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.handle().allocate_memory(&allocate_info, None)? };
        let actual = device.memory_properties().memory_types[memory_type_index as usize].property_flags;

        Ok(Self {
            device: Arc::clone(device),
            memory,
            size: requirements.size,
            memory_type_index,
            properties: actual,
        })
    }

    /// Get the raw memory handle.
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Allocation size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Flags of the memory type actually chosen.
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    pub fn is_host_visible(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> Result<()> {
        let end = offset.checked_add(len as vk::DeviceSize);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(GpuError::InvalidArgument(format!(
                "range {offset}+{len} exceeds allocation of {} bytes",
                self.size
            ))),
        }
    }

    /// Map `len` bytes at `offset` and hand them to `f`.
    ///
    /// Non-coherent memory is flushed after `f` returns.
    pub fn map_with<R>(
        &self,
        offset: vk::DeviceSize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        if !self.is_host_visible() {
            return Err(GpuError::InvalidArgument(format!(
                "memory type {} ({:?}) is not host visible",
                self.memory_type_index, self.properties
            )));
        }
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(f(&mut []));
        }

        let device = self.device.handle();
        unsafe {
            // The whole allocation is mapped so the flush range stays valid.
            let ptr = device.map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?;
            let bytes =
                std::slice::from_raw_parts_mut(ptr.cast::<u8>().add(offset as usize), len);
            let result = f(bytes);

            if !self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
                let range = vk::MappedMemoryRange::default()
                    .memory(self.memory)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                if let Err(e) = device.flush_mapped_memory_ranges(&[range]) {
                    device.unmap_memory(self.memory);
                    return Err(e.into());
                }
            }

            device.unmap_memory(self.memory);
            Ok(result)
        }
    }

    /// Copy `bytes` into the allocation at `offset`.
    pub fn write_bytes(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        self.map_with(offset, bytes.len(), |mapped| mapped.copy_from_slice(bytes))
    }

    /// Copy `len` bytes out of the allocation at `offset`.
    pub fn read_bytes(&self, offset: vk::DeviceSize, len: usize) -> Result<Vec<u8>> {
        self.map_with(offset, len, |mapped| mapped.to_vec())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe { self.device.handle().free_memory(self.memory, None) };
    }
}
