use std::{mem, slice, sync::Arc};

use anyhow::Context as _;
use ash::vk;
use memoffset::offset_of;
use vulkan_raii::{
    buffer::Buffer,
    command::{CommandBuffer, CommandPool},
    device::{Device, Queue},
    image::ImageView,
    pipeline::{Pipeline, PipelineLayout},
    queue_family::QueueType,
    shader::ShaderModule,
    swapchain::Swapchain,
    sync::{Fence, Semaphore},
    Configuration, Context,
};
use winit::{
    event::{Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowBuilder},
};

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 3],
}

const VERTICES: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

struct Renderer {
    graphics_pipeline: Pipeline,
    _pipeline_layout: PipelineLayout,
    acquire_semaphore: Semaphore,
    release_semaphore: Semaphore,
    queue_submit_fence: Fence,
    command_buffer: CommandBuffer,
    _command_pool: Arc<CommandPool>,
    vertex_buffer: Buffer,
    image_views: Vec<ImageView>,
    swapchain: Swapchain,
    graphics_queue: Queue,
    present_queue: Queue,
    device: Arc<Device>,
    context: Context,
}

impl Renderer {
    fn new(window: &Window) -> anyhow::Result<Self> {
        let config = Configuration {
            application_name: "triangle".into(),
            dynamic_rendering: true,
            ..Default::default()
        };
        let context = Context::with_window(&config, window)?;
        let device = context.device.clone();
        let surface = context
            .surface
            .clone()
            .context("window context without surface")?;

        let graphics_queue = device
            .queue_for(QueueType::Graphics)
            .context("no graphics queue")?;
        let present_queue = device.present_queue().context("no present queue")?;

        let size = window.inner_size();
        let swapchain = Swapchain::builder()
            .device(&device)
            .surface(&surface)
            .extent(size.width, size.height)
            .queue_family_indices([graphics_queue.family_index, present_queue.family_index])
            .build()?;
        let image_views = swapchain.create_image_views()?;

        let vertex_buffer = Buffer::builder()
            .device(&device)
            .size(mem::size_of_val(&VERTICES) as u64)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .build()?;
        vertex_buffer.fill(&VERTICES)?;

        let command_pool = Arc::new(
            CommandPool::builder()
                .device(&device)
                .queue_family_index(graphics_queue.family_index)
                .build()?,
        );
        let command_buffer = CommandBuffer::builder().pool(&command_pool).build_one()?;

        let queue_submit_fence = Fence::builder().device(&device).signaled(true).build()?;
        let acquire_semaphore = Semaphore::builder().device(&device).build()?;
        let release_semaphore = Semaphore::builder().device(&device).build()?;

        let pipeline_layout = PipelineLayout::builder().device(&device).build()?;
        let graphics_pipeline =
            create_graphics_pipeline(&device, &pipeline_layout, swapchain.parameters.format)?;

        Ok(Self {
            graphics_pipeline,
            _pipeline_layout: pipeline_layout,
            acquire_semaphore,
            release_semaphore,
            queue_submit_fence,
            command_buffer,
            _command_pool: command_pool,
            vertex_buffer,
            image_views,
            swapchain,
            graphics_queue,
            present_queue,
            device,
            context,
        })
    }

    fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.device.wait_idle()?;
        self.image_views.clear();
        self.swapchain.recreate(width, height)?;
        self.image_views = self.swapchain.create_image_views()?;
        Ok(())
    }

    fn draw(&mut self) -> anyhow::Result<()> {
        let extent = self.swapchain.parameters.extent;
        let device = &self.device;
        let dynamic_rendering = device
            .dynamic_rendering
            .as_ref()
            .context("dynamic rendering is not enabled")?;
        let command_buffer = self.command_buffer.handle;

        self.queue_submit_fence.wait(u64::MAX)?;
        self.command_buffer.reset()?;
        self.command_buffer
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let (index, _) = unsafe {
            self.swapchain.functions.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                self.acquire_semaphore.handle,
                vk::Fence::null(),
            )
        }?;
        let image = self.swapchain.images[index as usize];
        let color_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(vk::REMAINING_MIP_LEVELS)
            .layer_count(vk::REMAINING_ARRAY_LAYERS)
            .build();

        unsafe {
            device.handle.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice::from_ref(
                    &vk::ImageMemoryBarrier::builder()
                        .image(image)
                        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .subresource_range(color_range),
                ),
            );
        }

        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(self.image_views[index as usize].handle)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.2, 0.4, 1.0],
                },
            });
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D::builder().extent(extent).build())
            .layer_count(1)
            .color_attachments(slice::from_ref(&color_attachment));

        unsafe {
            dynamic_rendering.cmd_begin_rendering(command_buffer, &rendering_info);
            device.handle.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.graphics_pipeline.handle,
            );
            device.handle.cmd_set_viewport(
                command_buffer,
                0,
                slice::from_ref(
                    &vk::Viewport::builder()
                        .width(extent.width as f32)
                        .height(extent.height as f32)
                        .max_depth(1.0),
                ),
            );
            device.handle.cmd_set_scissor(
                command_buffer,
                0,
                slice::from_ref(&vk::Rect2D::builder().extent(extent)),
            );
            device.handle.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                slice::from_ref(&self.vertex_buffer.handle),
                &[0],
            );
            device.handle.cmd_draw(command_buffer, VERTICES.len() as u32, 1, 0, 0);
            dynamic_rendering.cmd_end_rendering(command_buffer);

            device.handle.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice::from_ref(
                    &vk::ImageMemoryBarrier::builder()
                        .image(image)
                        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                        .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                        .subresource_range(color_range),
                ),
            );
        }
        self.command_buffer.end()?;
        self.queue_submit_fence.reset()?;

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(slice::from_ref(&self.acquire_semaphore.handle))
            .wait_dst_stage_mask(&[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT])
            .signal_semaphores(slice::from_ref(&self.release_semaphore.handle))
            .command_buffers(slice::from_ref(&command_buffer));
        unsafe {
            device.handle.queue_submit(
                self.graphics_queue.handle,
                slice::from_ref(&submit_info),
                self.queue_submit_fence.handle,
            )
        }?;

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(slice::from_ref(&self.release_semaphore.handle))
            .swapchains(slice::from_ref(&self.swapchain.handle))
            .image_indices(slice::from_ref(&index));
        unsafe {
            self.swapchain
                .functions
                .queue_present(self.present_queue.handle, &present_info)
        }?;

        self.context.check_validation()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(error) = self.device.wait_idle() {
            tracing::error!("{error:#}");
        }
    }
}

fn create_graphics_pipeline(
    device: &Arc<Device>,
    layout: &PipelineLayout,
    color_format: vk::Format,
) -> anyhow::Result<Pipeline> {
    let compiler = shaderc::Compiler::new().context("creating shader compiler")?;
    let vertex_shader = ShaderModule::builder()
        .device(device)
        .code(compile_shader(
            &compiler,
            include_str!("shaders/triangle.vert"),
            "triangle.vert",
            shaderc::ShaderKind::Vertex,
        )?)
        .build()?;
    let fragment_shader = ShaderModule::builder()
        .device(device)
        .code(compile_shader(
            &compiler,
            include_str!("shaders/triangle.frag"),
            "triangle.frag",
            shaderc::ShaderKind::Fragment,
        )?)
        .build()?;

    Pipeline::graphics()
        .device(device)
        .layout(layout)
        .stage(vk::ShaderStageFlags::VERTEX, &vertex_shader, c"main")
        .stage(vk::ShaderStageFlags::FRAGMENT, &fragment_shader, c"main")
        .vertex_binding(0, mem::size_of::<Vertex>() as u32, vk::VertexInputRate::VERTEX)
        .vertex_attribute(
            0,
            0,
            vk::Format::R32G32B32_SFLOAT,
            offset_of!(Vertex, position) as u32,
        )
        .vertex_attribute(
            1,
            0,
            vk::Format::R32G32B32_SFLOAT,
            offset_of!(Vertex, color) as u32,
        )
        .cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::CLOCKWISE)
        .rendering_formats([color_format], vk::Format::UNDEFINED)
        .build()
}

fn compile_shader(
    compiler: &shaderc::Compiler,
    source: &str,
    file_name: &str,
    kind: shaderc::ShaderKind,
) -> anyhow::Result<Vec<u32>> {
    let result = compiler.compile_into_spirv(source, kind, file_name, "main", None)?;
    Ok(result.as_binary().to_owned())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title("vulkan-raii triangle")
        .build(&event_loop)?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut renderer = Renderer::new(&window)?;

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        }
        | Event::WindowEvent {
            event:
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(KeyCode::Escape),
                            ..
                        },
                    ..
                },
            ..
        } => {
            elwt.exit();
        }
        Event::WindowEvent {
            event: WindowEvent::Resized(size),
            ..
        } if size.width > 0 && size.height > 0 => {
            if let Err(error) = renderer.resize(size.width, size.height) {
                tracing::error!("resize failed: {error:#}");
            }
        }
        Event::AboutToWait => {
            window.request_redraw();
        }
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            ..
        } => {
            if let Err(error) = renderer.draw() {
                tracing::error!("draw failed: {error:#}");
                elwt.exit();
            }
        }
        _ => (),
    })?;

    Ok(())
}
