//! Command pools, one-time submits and the command batch.

use crate::error::{GpuError, Result};
use crate::logical_device::LogicalDevice;
use crate::queue::Queue;
use ash::vk;
use std::sync::Arc;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    device: Arc<LogicalDevice>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    pub fn new(
        device: &Arc<LogicalDevice>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        Ok(Self {
            device: Arc::clone(device),
            pool,
            queue_family,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    /// Allocate command buffers; they are freed with the pool.
    pub fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    /// Reset the command pool.
    ///
    /// # Safety
    /// No command buffer from this pool may be pending execution.
    pub unsafe fn reset(&self, flags: vk::CommandPoolResetFlags) -> Result<()> {
        self.device.handle().reset_command_pool(self.pool, flags)?;
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
    }
}

/// Record `f` into a fresh command buffer, submit it and wait for the queue.
pub fn execute_one_time_commands<F>(pool: &CommandPool, queue: &Queue, f: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    if queue.family_index() != pool.queue_family() {
        return Err(GpuError::InvalidArgument(format!(
            "queue family {} does not match command pool family {}",
            queue.family_index(),
            pool.queue_family()
        )));
    }

    let device = pool.device().handle();
    let cmd = pool
        .allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, 1)?
        .into_iter()
        .next()
        .ok_or(GpuError::ResourceExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY))?;

    let result = (|| unsafe {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmd, &begin_info)?;
        f(device, cmd);
        device.end_command_buffer(cmd)?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        queue.submit(&[submit_info], vk::Fence::null())?;
        queue.wait_idle()
    })();

    unsafe { device.free_command_buffers(pool.handle(), &[cmd]) };
    result
}

/// A recording closure registered with a [`CommandBatch`].
pub type RecordFn<'a> = Box<dyn FnMut(&ash::Device, vk::CommandBuffer) + 'a>;

/// A command pool with `N` primary command buffers and the closures that fill them.
///
/// `run_commands(i)` re-records buffer `i` from scratch by replaying every
/// registered closure in registration order.
pub struct CommandBatch<'a> {
    pool: CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    commands: Vec<RecordFn<'a>>,
}

impl<'a> CommandBatch<'a> {
    /// Create a batch of `count` primary command buffers for `queue_family`.
    pub fn new(device: &Arc<LogicalDevice>, count: u32, queue_family: u32) -> Result<Self> {
        let pool = CommandPool::new(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let buffers = pool.allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, count)?;

        Ok(Self {
            pool,
            buffers,
            commands: Vec::new(),
        })
    }

    /// Register a recording closure.
    pub fn add_command<F>(&mut self, command: F)
    where
        F: FnMut(&ash::Device, vk::CommandBuffer) + 'a,
    {
        self.commands.push(Box::new(command));
    }

    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    pub fn command_buffer(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Reset buffer `index` and record every closure into it.
    ///
    /// The buffer must not be pending execution.
    pub fn run_commands(&mut self, index: usize) -> Result<()> {
        let cmd = self.command_buffer(index).ok_or_else(|| {
            GpuError::InvalidArgument(format!(
                "command buffer {index} out of range ({} allocated)",
                self.buffers.len()
            ))
        })?;
        let device = self.pool.device().handle();

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
        }

        for command in &mut self.commands {
            command(device, cmd);
        }

        unsafe { device.end_command_buffer(cmd)? };
        Ok(())
    }
}
