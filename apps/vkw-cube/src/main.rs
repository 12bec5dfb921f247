//! Colored cube demo.
//!
//! Renders a single frame of a colored cube, presents it, then keeps the
//! window open until it is closed or Escape is pressed.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vkw-cube -- [OPTIONS]
//! ```
//!
//! Run with `--help` for the list of options. Log output is controlled with
//! `RUST_LOG` and defaults to `info`.

mod config;
mod pass;
mod scene;

use anyhow::Context;
use glam::Mat4;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vkw_gpu::{
    create_depth_buffer, util, vk, AppInfo, Buffer, CommandBatch, CommandPool, DebugInfo,
    DescriptorPool, DescriptorSetLayoutBuilder, DeviceSummary, Fence, GpuError,
    GraphicsPipeline, GraphicsPipelineInfo, Instance, InstanceInfo, LogicalDevice,
    LogicalDeviceInfo, PipelineCache, PipelineLayout, Semaphore, ShaderStage, Swapchain,
    SwapchainInfo, WriteBufferSet,
};
use vkw_platform::{KeyCode, Window, WindowConfig, WindowEvent};
use vkw_shaders::{glsl_to_spirv, CUBE_FRAGMENT_SOURCE, CUBE_VERTEX_SOURCE};

use crate::config::CubeConfig;
use crate::pass::CubePass;
use crate::scene::Vertex;

/// How long a single fence wait may block before it is retried.
const FENCE_TIMEOUT_NS: u64 = 100_000_000;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        config::print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run(&CubeConfig::from_args())
}

fn run(config: &CubeConfig) -> anyhow::Result<()> {
    // Instance
    let instance = Instance::new(
        &AppInfo::default().with_name("vkw-cube"),
        &InstanceInfo::default().with_extensions(vkw_platform::required_instance_extensions()),
        DebugInfo {
            utils: config.validation,
            validation: config.validation,
        },
    )
    .context("Failed to create Vulkan instance")?;

    let physical_device = *instance
        .physical_devices()
        .first()
        .context("No Vulkan physical device")?;
    let summary = DeviceSummary::query(&instance, physical_device);
    info!("GPU: {}", summary.summary());

    let dynamic = !config.classic && summary.supports_dynamic_rendering;
    if !config.classic && !dynamic {
        warn!("Dynamic rendering needs Vulkan 1.3, using a classic render pass");
    }

    // Window
    let mut window = Window::new(
        &instance,
        WindowConfig::default().with_size(config.width, config.height),
    )
    .context("Failed to create window")?;
    window.add_event_handler(|state, event| {
        if *event == WindowEvent::KeyDown(KeyCode::Escape) {
            state.set_should_close(true);
        }
    });
    let surface = Arc::clone(window.surface());

    // Logical device
    let mut device_info = LogicalDeviceInfo::new(&instance, physical_device)
        .with_extension(vkw_gpu::ash::khr::swapchain::NAME);
    if dynamic {
        device_info = device_info.with_vulkan_13_features(
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true),
        );
    }

    let graphics_family = device_info
        .add_queues_by_capability(vk::QueueFlags::GRAPHICS, 1.0, 1)
        .context("No queues with graphics support")?;

    let mut present_family = None;
    for family in &device_info.queue_family_info_list {
        if !family.queues.is_empty()
            && surface.supports_queue_family(physical_device, family.family_index)?
        {
            present_family = Some(family.family_index);
            break;
        }
    }
    let present_family = match present_family {
        Some(family) => family,
        None => {
            let family =
                util::find_present_queue_index(&instance, physical_device, surface.handle())?
                    .context("No queues with present support")?;
            device_info.add_queues(family, 1.0, 1);
            family
        }
    };

    let device = LogicalDevice::new(Arc::clone(&instance), device_info)
        .context("Failed to create logical device")?;
    let graphics_queue = device.get_queue(vk::QueueFlags::GRAPHICS, 0)?;
    let present_queue = device
        .get_present_queue(&surface)?
        .context("No present queue")?;

    // Swapchain
    let surface_caps = surface.capabilities(physical_device)?;
    let format = util::select_srgb_surface_format(&surface_caps.formats)
        .context("No SRGB surface format")?;
    let shared_families = if graphics_family == present_family {
        Vec::new()
    } else {
        vec![graphics_family, present_family]
    };
    let swapchain = Swapchain::new(
        &device,
        Arc::clone(&surface),
        SwapchainInfo::new(format, window.size())
            .with_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .with_vsync(config.vsync)
            .with_shared_queue_families(shared_families),
    )
    .context("Failed to create swapchain")?;

    // Depth buffer and render pass
    let depth_format = util::select_depth_format(&instance, physical_device)?;
    let depth_buffer = create_depth_buffer(&device, depth_format, swapchain.extent())?;
    let pass = if dynamic {
        CubePass::dynamic(&device, &swapchain, &depth_buffer)
    } else {
        CubePass::classic(&device, &swapchain, &depth_buffer)?
    };

    // Vertex and uniform buffers
    let upload_pool =
        CommandPool::new(&device, graphics_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
    let vertices = scene::colored_cube();
    let vertex_buffer = Buffer::<Vertex>::new(
        &device,
        vertices.len(),
        vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    vertex_buffer
        .upload_staged(&upload_pool, graphics_queue, &vertices)
        .context("Failed to upload vertices")?;

    let uniform_buffer =
        Buffer::<Mat4>::new_host(&device, 1, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
    uniform_buffer.upload_value(&scene::model_view_projection(swapchain.extent()))?;

    // Descriptors
    let descriptor_pool = DescriptorPool::new(
        &device,
        &[vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        }],
        None,
        vk::DescriptorPoolCreateFlags::empty(),
    )?;
    let descriptor_layout = DescriptorSetLayoutBuilder::new()
        .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
        .build(&device)?;
    let descriptor_set = descriptor_pool.allocate(&descriptor_layout)?;
    descriptor_set.update(&[WriteBufferSet::new(0, vec![uniform_buffer.handle()]).into()])?;

    // Shaders
    let vertex_stage = ShaderStage::new(
        &device,
        vk::ShaderStageFlags::VERTEX,
        &glsl_to_spirv(vk::ShaderStageFlags::VERTEX, CUBE_VERTEX_SOURCE)?,
    )?;
    let fragment_stage = ShaderStage::new(
        &device,
        vk::ShaderStageFlags::FRAGMENT,
        &glsl_to_spirv(vk::ShaderStageFlags::FRAGMENT, CUBE_FRAGMENT_SOURCE)?,
    )?;

    // Pipeline
    let cache = PipelineCache::new(&device, &[])?;
    let pipeline_layout =
        PipelineLayout::new(&device, vec![Arc::clone(&descriptor_layout)], Vec::new())?;
    let pipeline_info =
        GraphicsPipelineInfo::new(pass.pipeline_target(), vk::FrontFace::CLOCKWISE)
            .with_stage(&vertex_stage)
            .with_stage(&fragment_stage)
            .with_vertex_input(vec![Vertex::binding()], Vertex::attributes())
            .with_depth(true, vk::CompareOp::LESS_OR_EQUAL)
            .with_color_blend_attachment(vkw_gpu::pipeline::opaque_color_attachment())
            .with_cache(&cache);
    let pipeline = GraphicsPipeline::new(&device, pipeline_layout, &pipeline_info)
        .context("Failed to create graphics pipeline")?;

    // Commands
    let image_index = Cell::new(0usize);
    let record_error: RefCell<Option<GpuError>> = RefCell::new(None);
    let vertex_count = u32::try_from(vertices.len())?;

    let mut batch = CommandBatch::new(&device, 1, graphics_family)?;
    batch.add_command(|device, cmd| {
        let frame = image_index.get();
        if let Err(e) = pass.begin(frame, cmd) {
            record_error.borrow_mut().get_or_insert(e);
            return;
        }

        let area = pass.render_area();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: area.extent.width as f32,
            height: area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[area]);
        }

        pipeline.bind(cmd);
        pipeline.bind_descriptor_sets(cmd, 0, &[descriptor_set.handle()], &[]);

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer.handle()], &[0]);
            device.cmd_draw(cmd, vertex_count, 1, 0, 0);
        }

        if let Err(e) = pass.end(frame, cmd) {
            record_error.borrow_mut().get_or_insert(e);
        }
    });

    // Acquire and record
    let image_acquired = Semaphore::new(&device)?;
    let (acquired, suboptimal) =
        swapchain.acquire_next_image(u64::MAX, image_acquired.handle(), vk::Fence::null())?;
    if suboptimal {
        warn!("Acquired image {acquired} from a suboptimal swapchain");
    }
    image_index.set(acquired as usize);

    batch.run_commands(0)?;
    if let Some(e) = record_error.take() {
        return Err(e).context("Failed to record the frame");
    }

    // Submit and wait
    let draw_fence = Fence::new(&device, false)?;
    let command_buffers = [batch.command_buffer(0).context("Missing command buffer")?];
    unsafe {
        graphics_queue.submit_command_buffers(
            &command_buffers,
            &[image_acquired.handle()],
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            &[],
            draw_fence.handle(),
        )?;
    }

    loop {
        match draw_fence.wait(FENCE_TIMEOUT_NS) {
            Ok(()) => break,
            Err(GpuError::Timeout) => debug!("Still waiting for the frame to finish"),
            Err(e) => return Err(e).context("Failed to wait for the frame"),
        }
    }

    // Present
    match swapchain.present(present_queue, acquired, &[]) {
        Ok(()) | Err(GpuError::PresentSuboptimal) => {}
        Err(e) => return Err(e).context("Failed to present"),
    }
    device.wait_idle()?;
    info!("Frame presented, waiting for the window to close");

    while !window.should_close() {
        window.pump(Some(Duration::from_millis(16)));
    }

    info!("Shutting down");
    Ok(())
}
