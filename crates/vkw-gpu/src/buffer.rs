//! Typed buffers backed by their own device memory.

use crate::command::{execute_one_time_commands, CommandPool};
use crate::error::{GpuError, Result};
use crate::logical_device::LogicalDevice;
use crate::memory::{DeviceMemory, HOST_MEMORY};
use crate::queue::Queue;
use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::sync::Arc;

/// A buffer of `count` elements of `T`.
pub struct Buffer<T> {
    device: Arc<LogicalDevice>,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    count: usize,
    usage: vk::BufferUsageFlags,
    _marker: PhantomData<T>,
}

impl<T: Pod> Buffer<T> {
    /// Create a buffer of `count` elements and bind fresh memory at offset 0.
    pub fn new(
        device: &Arc<LogicalDevice>,
        count: usize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let size = count
            .checked_mul(std::mem::size_of::<T>())
            .filter(|&size| size > 0)
            .ok_or_else(|| {
                GpuError::InvalidArgument(format!(
                    "buffer of {count} x {} bytes is empty or too large",
                    std::mem::size_of::<T>()
                ))
            })?;

        let create_info = vk::BufferCreateInfo::default()
            .size(size as vk::DeviceSize)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = device.handle();
        let buffer = unsafe { raw.create_buffer(&create_info, None)? };

        let bound = (|| -> Result<DeviceMemory> {
            let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
            let memory = DeviceMemory::allocate(device, requirements, memory_properties)?;
            unsafe { raw.bind_buffer_memory(buffer, memory.handle(), 0)? };
            Ok(memory)
        })();
        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        tracing::debug!(
            count,
            bytes = size,
            allocation = memory.size(),
            ?usage,
            "Created buffer"
        );

        Ok(Self {
            device: Arc::clone(device),
            buffer,
            memory,
            count,
            usage,
            _marker: PhantomData,
        })
    }

    /// Create a host-visible, host-coherent buffer.
    pub fn new_host(
        device: &Arc<LogicalDevice>,
        count: usize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::new(device, count, usage, HOST_MEMORY)
    }

    /// Create a buffer behind shared ownership.
    pub fn create(
        device: &Arc<LogicalDevice>,
        count: usize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Arc<Self>> {
        Self::new(device, count, usage, memory_properties).map(Arc::new)
    }

    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Capacity in elements.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Capacity in bytes.
    pub fn size_bytes(&self) -> vk::DeviceSize {
        (self.count * std::mem::size_of::<T>()) as vk::DeviceSize
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    fn require_host_memory(&self) -> Result<()> {
        if self.memory.properties().contains(HOST_MEMORY) {
            Ok(())
        } else {
            Err(GpuError::InvalidArgument(format!(
                "host access needs host-visible coherent memory, buffer has {:?}",
                self.memory.properties()
            )))
        }
    }

    fn require_capacity(&self, len: usize) -> Result<()> {
        if len > self.count {
            Err(GpuError::InvalidArgument(format!(
                "{len} elements exceed buffer capacity of {}",
                self.count
            )))
        } else {
            Ok(())
        }
    }

    /// Write a single value at element 0.
    pub fn upload_value(&self, value: &T) -> Result<()> {
        self.upload(std::slice::from_ref(value))
    }

    /// Write `data` starting at element 0 through a host mapping.
    pub fn upload(&self, data: &[T]) -> Result<()> {
        self.require_host_memory()?;
        self.require_capacity(data.len())?;
        self.memory.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Copy `data` into device-local memory through a transient staging buffer.
    ///
    /// Blocks until `queue` is idle.
    pub fn upload_staged(&self, pool: &CommandPool, queue: &Queue, data: &[T]) -> Result<()> {
        if !self.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            return Err(GpuError::InvalidArgument(
                "staged upload needs TRANSFER_DST usage".to_string(),
            ));
        }
        if !self
            .memory
            .properties()
            .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        {
            return Err(GpuError::InvalidArgument(
                "staged upload targets device-local memory".to_string(),
            ));
        }
        self.require_capacity(data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        let staging =
            Self::new_host(&self.device, data.len(), vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.upload(data)?;

        let region = vk::BufferCopy::default().size(staging.size_bytes());
        execute_one_time_commands(pool, queue, |device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.handle(), self.buffer, &[region]);
        })
    }

    /// Read the whole buffer back through a host mapping.
    pub fn download(&self) -> Result<Vec<T>> {
        self.require_host_memory()?;
        let mut out = vec![T::zeroed(); self.count];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        let len = bytes.len();
        self.memory
            .map_with(0, len, |mapped| bytes.copy_from_slice(mapped))?;
        Ok(out)
    }

    /// Read the whole buffer back through a transient staging buffer.
    ///
    /// Needs `TRANSFER_SRC` usage. Blocks until `queue` is idle.
    pub fn download_staged(&self, pool: &CommandPool, queue: &Queue) -> Result<Vec<T>> {
        if !self.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            return Err(GpuError::InvalidArgument(
                "staged download needs TRANSFER_SRC usage".to_string(),
            ));
        }

        let staging = Self::new_host(&self.device, self.count, vk::BufferUsageFlags::TRANSFER_DST)?;
        let region = vk::BufferCopy::default().size(self.size_bytes());
        execute_one_time_commands(pool, queue, |device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, self.buffer, staging.handle(), &[region]);
        })?;
        staging.download()
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
    }
}
