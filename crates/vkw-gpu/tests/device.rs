//! Tests against a real Vulkan driver. Run with `cargo test -- --ignored`.

use std::cell::RefCell;
use std::sync::Arc;
use vkw_gpu::vk;
use vkw_gpu::{
    AppInfo, BindlessCapacities, BindlessDescriptorManager, BindlessSlot, Buffer, CommandBatch,
    CommandPool, DebugInfo, DeviceSummary, GpuError, Image, ImageInfo, Instance, InstanceInfo,
    LogicalDevice, LogicalDeviceInfo, RenderPass, RenderPassInfo, Subpass, HOST_MEMORY,
};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 64,
    height: 64,
};

/// `None` when bindless is requested but the device lacks descriptor indexing.
fn headless_device(bindless: bool) -> Option<(Arc<LogicalDevice>, u32)> {
    let instance = Instance::new(
        &AppInfo::default().with_name("vkw-gpu-tests"),
        &InstanceInfo::default(),
        DebugInfo::disabled(),
    )
    .unwrap();
    let physical_device = instance.physical_devices()[0];
    if bindless && !DeviceSummary::query(&instance, physical_device).supports_descriptor_indexing {
        return None;
    }

    let mut info = LogicalDeviceInfo::new(&instance, physical_device);
    if bindless {
        info = info.with_vulkan_12_features(BindlessDescriptorManager::required_features());
    }
    let family = info
        .add_queues_by_capability(vk::QueueFlags::GRAPHICS, 1.0, 1)
        .unwrap();
    Some((LogicalDevice::new(instance, info).unwrap(), family))
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn buffer_allocation_covers_contents() {
    let (device, _) = headless_device(false).unwrap();
    for count in [1usize, 3, 1000] {
        let buffer =
            Buffer::<[f32; 3]>::new_host(&device, count, vk::BufferUsageFlags::VERTEX_BUFFER)
                .unwrap();
        assert_eq!(buffer.size_bytes(), (count * 12) as vk::DeviceSize);
        assert!(buffer.memory().size() >= buffer.size_bytes());
    }
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn host_upload_round_trips() {
    let (device, _) = headless_device(false).unwrap();
    let buffer = Buffer::<u32>::new_host(&device, 8, vk::BufferUsageFlags::STORAGE_BUFFER).unwrap();
    buffer.upload(&[1, 2, 3]).unwrap();
    assert_eq!(&buffer.download().unwrap()[..3], &[1, 2, 3]);
    assert!(buffer.upload(&[0; 9]).is_err());
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn staged_upload_reads_back() {
    let (device, family) = headless_device(false).unwrap();
    let queue = device.get_queue(vk::QueueFlags::GRAPHICS, 0).unwrap().clone();
    let pool = CommandPool::new(&device, family, vk::CommandPoolCreateFlags::TRANSIENT).unwrap();

    let data: Vec<u32> = (0..256).map(|i| i * 7).collect();
    let buffer = Buffer::<u32>::new(
        &device,
        data.len(),
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    buffer.upload_staged(&pool, &queue, &data).unwrap();
    assert_eq!(buffer.download_staged(&pool, &queue).unwrap(), data);
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn one_framebuffer_per_target_group() {
    let (device, _) = headless_device(false).unwrap();
    let format = vk::Format::R8G8B8A8_UNORM;
    let images: Vec<_> = (0..3)
        .map(|_| {
            Image::new(
                &device,
                ImageInfo::new_2d(
                    format,
                    EXTENT,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    vk::ImageAspectFlags::COLOR,
                ),
            )
            .unwrap()
        })
        .collect();

    let attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    let color = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };

    let mut info = RenderPassInfo::new(EXTENT)
        .with_attachment(attachment)
        .with_subpass(Subpass::graphics(vec![color], None));
    for image in &images {
        info = info.with_target(vec![Arc::clone(image.view())]);
    }
    let pass = RenderPass::new(&device, info.clone()).unwrap();
    assert_eq!(pass.framebuffers().len(), images.len());
    assert!(pass
        .targets()
        .iter()
        .all(|group| group.len() == pass.attachment_count()));

    let bad = info.with_target(Vec::new());
    assert!(RenderPass::new(&device, bad).is_err());
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn bindless_handles_follow_resource_lifetimes() {
    let Some((device, _)) = headless_device(true) else {
        return;
    };

    let manager = BindlessDescriptorManager::new(
        &device,
        BindlessCapacities {
            storage_buffers: 8,
            sampled_images: 8,
            storage_images: 8,
            samplers: 8,
        },
    )
    .unwrap();

    let mut buffers: Vec<_> = (0..4)
        .map(|_| {
            manager
                .create_storage_buffer::<u32>(16, vk::BufferUsageFlags::STORAGE_BUFFER, HOST_MEMORY)
                .unwrap()
        })
        .collect();
    let indices: Vec<_> = buffers.iter().map(|b| b.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(manager.live_count(BindlessSlot::StorageBuffer), 4);

    let released = buffers.remove(2).handle();
    assert_eq!(manager.live_count(BindlessSlot::StorageBuffer), 3);
    assert!(!manager.is_live(BindlessSlot::StorageBuffer, released));
    assert!(manager.get_storage_buffer::<u32>(released).is_none());

    let reused = manager
        .create_storage_buffer::<u32>(16, vk::BufferUsageFlags::STORAGE_BUFFER, HOST_MEMORY)
        .unwrap();
    assert_eq!(reused.index(), 2);
    assert_eq!(reused.handle().generation, 1);
    assert!(manager.get_storage_buffer::<u32>(reused.handle()).is_some());

    let wrong_usage = manager.create_storage_buffer::<u32>(
        16,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        HOST_MEMORY,
    );
    assert!(wrong_usage.is_err());
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn command_batch_replays_in_registration_order() {
    let (device, family) = headless_device(false).unwrap();
    let recorded = RefCell::new(Vec::new());

    let mut batch = CommandBatch::new(&device, 2, family).unwrap();
    batch.add_command(|_, cmd| recorded.borrow_mut().push(("first", cmd)));
    batch.add_command(|_, cmd| recorded.borrow_mut().push(("second", cmd)));
    let buffers = batch.command_buffers().to_vec();

    batch.run_commands(1).unwrap();
    batch.run_commands(0).unwrap();
    assert!(matches!(
        batch.run_commands(2),
        Err(GpuError::InvalidArgument(_))
    ));
    drop(batch);

    assert_eq!(
        recorded.into_inner(),
        vec![
            ("first", buffers[1]),
            ("second", buffers[1]),
            ("first", buffers[0]),
            ("second", buffers[0]),
        ]
    );
}
