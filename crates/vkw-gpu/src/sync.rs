//! Synchronization primitives.

use crate::error::Result;
use crate::logical_device::LogicalDevice;
use ash::vk;
use std::sync::Arc;

/// An owned binary semaphore.
pub struct Semaphore {
    device: Arc<LogicalDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self {
            device: Arc::clone(device),
            semaphore,
        })
    }

    /// Get the raw semaphore handle.
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// An owned fence.
pub struct Fence {
    device: Arc<LogicalDevice>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled.
    pub fn new(device: &Arc<LogicalDevice>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self {
            device: Arc::clone(device),
            fence,
        })
    }

    /// Get the raw fence handle.
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Wait until the fence is signaled.
    ///
    /// Returns [`crate::GpuError::Timeout`] when `timeout_ns` elapses first.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        self.device.wait_for_fences(&[self.fence], true, timeout_ns)
    }

    /// Whether the fence is currently signaled.
    pub fn is_signaled(&self) -> Result<bool> {
        let signaled = unsafe { self.device.handle().get_fence_status(self.fence)? };
        Ok(signaled)
    }

    /// Reset the fence to unsignaled.
    pub fn reset(&self) -> Result<()> {
        self.device.reset_fences(&[self.fence])
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}
