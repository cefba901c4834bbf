// Command recording and submission
//
// Per-frame command buffers are reset and re-recorded every frame: scene
// content changes each frame, so there's nothing to gain from pre-recording.
// Uploads use short-lived one-shot buffers from a transient pool.

use ash::vk;
use std::sync::Arc;

use super::pipeline::PipelineHandle;
use super::RenderDeviceContext;
use crate::error::RenderResult;

pub fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> RenderResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family)
        .flags(flags);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }?;
    Ok(pool)
}

/// Record commands into a throwaway buffer, submit, and block until the queue drains.
///
/// The command buffer is freed on every path, including recording failures.
pub fn submit_one_shot(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> RenderResult<()> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }?;
    let cmd = command_buffers[0];

    let result = (|| -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.begin_command_buffer(cmd, &begin_info)?;
            record(cmd);
            device.end_command_buffer(cmd)?;

            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
            device.queue_wait_idle(queue)?;
        }
        Ok(())
    })();

    unsafe { device.free_command_buffers(pool, &command_buffers) };
    result
}

/// One indexed draw of a registered mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    /// Byte offset into the dynamic per-object uniform buffer
    pub dynamic_offset: u32,
}

/// Everything needed to record one frame's render pass
pub struct FramePass<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: &'a PipelineHandle,
    pub descriptor_set: vk::DescriptorSet,
    pub draws: &'a [DrawCommand],
}

/// Owns the per-frame command pool and submits to the graphics queue
pub struct CommandSubmitter {
    context: Arc<RenderDeviceContext>,
    pool: vk::CommandPool,
    // Pre-allocated to avoid per-frame heap allocations
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl CommandSubmitter {
    pub fn new(context: Arc<RenderDeviceContext>) -> RenderResult<Self> {
        // RESET: each frame slot resets its own buffer before re-recording
        let pool = create_command_pool(
            &context.device,
            context.choice.graphics_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        Ok(Self {
            context,
            pool,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        })
    }

    pub fn allocate(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.context.device.allocate_command_buffers(&alloc_info) }?;
        Ok(buffers)
    }

    /// Reset `cmd` and record the full render pass for one frame.
    pub fn record(&self, cmd: vk::CommandBuffer, pass: &FramePass<'_>) -> RenderResult<()> {
        let device = &self.context.device;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: pass.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: pass.extent,
        };

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass.extent.width as f32,
            height: pass.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(pass.render_pass)
                .framebuffer(pass.framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pass.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            for draw in pass.draws {
                device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
                device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pass.pipeline.layout,
                    0,
                    &[pass.descriptor_set],
                    &[draw.dynamic_offset],
                );
                device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    /// Submit `cmd`: wait on `image_available` at color output, signal
    /// `render_finished`, and signal `fence` once the GPU is done.
    pub fn submit(
        &self,
        cmd: vk::CommandBuffer,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        fence: vk::Fence,
    ) -> RenderResult<()> {
        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context
                .device
                .queue_submit(self.context.graphics_queue, &[submit_info.build()], fence)?;
        }

        Ok(())
    }

    /// Submit a batch with no command buffers that signals `fence`, after
    /// waiting on `wait` if given.
    pub fn submit_signal_only(&self, wait: Option<vk::Semaphore>, fence: vk::Fence) -> RenderResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = &self.wait_stages[..wait_semaphores.len()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(wait_stages);

        unsafe {
            self.context
                .device
                .queue_submit(self.context.graphics_queue, &[submit_info.build()], fence)?;
        }

        Ok(())
    }
}

impl Drop for CommandSubmitter {
    fn drop(&mut self) {
        // Also frees every command buffer allocated from it
        unsafe { self.context.device.destroy_command_pool(self.pool, None) };
    }
}
