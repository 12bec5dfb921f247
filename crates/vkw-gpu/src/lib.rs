//! Thin RAII layer over Vulkan.
//!
//! This crate provides:
//! - Instance creation with layer/extension resolution and a debug messenger
//! - Logical devices with capability-keyed queue lookup
//! - Buffers, images, textures and samplers, each owning one allocation
//! - Swapchains, classic render passes and dynamic rendering
//! - Descriptor layouts, pools and sets, plus a bindless descriptor manager
//! - Pipeline layouts, caches and graphics pipelines
//! - Command pools and replayable command batches

pub mod bindless;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod image;
pub mod instance;
pub mod layout;
pub mod logical_device;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod util;

pub use ash;
pub use ash::vk;

pub use bindless::{BindlessCapacities, BindlessDescriptorManager, BindlessSlot, Handle, HandleTable, Indexed};
pub use buffer::Buffer;
pub use capabilities::{DeviceSummary, GpuVendor};
pub use command::{execute_one_time_commands, CommandBatch, CommandPool};
pub use descriptors::{
    DescriptorBinding, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorWrite, WriteBufferSet, WriteImageSet, WriteSamplerSet,
};
pub use error::{GpuError, Result};
pub use image::{create_depth_buffer, depth_buffer_info, Image, ImageInfo, ImageView, Sampler};
pub use instance::{AppInfo, DebugInfo, Instance, InstanceInfo};
pub use layout::set_image_layout;
pub use logical_device::{LogicalDevice, LogicalDeviceInfo};
pub use memory::{DeviceMemory, HOST_MEMORY};
pub use pipeline::{
    GraphicsPipeline, GraphicsPipelineInfo, PipelineCache, PipelineLayout, PipelineTarget,
    ShaderStage, Specialization,
};
pub use queue::{Queue, QueueFamilyInfo, QueueInfo};
pub use render_pass::{RenderPass, RenderPassInfo, RenderPassSingle, RenderingAttachment, Subpass};
pub use surface::{Surface, SurfaceCapabilities};
pub use swapchain::{Swapchain, SwapchainInfo};
pub use sync::{Fence, Semaphore};
pub use texture::{checkerboard, Texture, TextureInfo};
