// Frame coordinator
//
// RenderSystem ties the backend managers together and drives one frame:
// wait -> acquire -> update uniforms -> record -> submit -> present -> advance.
// Swapchain recreation happens only inside a device-idle window, and an
// out-of-date acquire abandons the frame before anything reaches the GPU.

pub mod frame;
pub mod state;
pub mod uniforms;

pub use frame::{
    CameraData, FrameRenderData, LightingData, Mesh, MeshHandle, PointLight, RenderObject, Vertex,
    MAX_LIGHTS,
};
pub use state::{DrawPlan, FrameEvent, FramePhase, SwapchainAction};

use ash::vk;
use std::mem::size_of;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::buffer::dynamic_alignment;
use crate::backend::command::{DrawCommand, FramePass};
use crate::backend::handle::NamedArena;
use crate::backend::shader::ShaderWatcher;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::backend::sync::FrameSlots;
use crate::backend::{
    BufferHandle, BufferKind, BufferManager, CommandSubmitter, DescriptorManager, PipelineConfig,
    PipelineManager, RenderDeviceContext, SwapchainManager, WindowHandles,
};
use crate::error::{RenderError, RenderResult};
use crate::MAX_FRAMES_IN_FLIGHT;
use state::{after_out_of_date, resolve_mesh, AcquireRetry, SurfaceTracker};
use uniforms::{pack_object_slots, LightingUbo, ObjectUbo, SceneUbo};

pub const SCENE_UBO: &str = "scene_ubo";
pub const OBJECT_UBO: &str = "object_ubo";
pub const LIGHTING_UBO: &str = "lighting_ubo";
pub const MESH_PIPELINE: &str = "mesh";

// Acquire retries per frame before giving up until the next call
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Settings the render system needs at startup
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub app_name: String,
    pub enable_validation: bool,
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    /// Clamped to `1..=MAX_FRAMES_IN_FLIGHT`
    pub frames_in_flight: usize,
    /// Capacity of the dynamic per-object uniform buffer
    pub max_objects: usize,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub hot_reload_shaders: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "frame-core".to_string(),
            enable_validation: cfg!(debug_assertions),
            present_mode: vk::PresentModeKHR::MAILBOX,
            clear_color: [0.02, 0.02, 0.05, 1.0],
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            max_objects: 1024,
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            hot_reload_shaders: false,
        }
    }
}

/// Pipeline description for registered meshes
pub fn mesh_pipeline_config(
    config: &RendererConfig,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
) -> PipelineConfig {
    let mut pipeline = PipelineConfig::new(
        config.vertex_shader.clone(),
        config.fragment_shader.clone(),
        render_pass,
    );
    pipeline.vertex_bindings = vec![Vertex::binding_description()];
    pipeline.vertex_attributes = Vertex::attribute_descriptions().to_vec();
    pipeline.set_layouts = vec![set_layout];
    pipeline
}

fn step(phase: &mut FramePhase, event: FrameEvent) {
    match phase.on(event) {
        Some(next) => *phase = next,
        None => {
            log::error!("Invalid frame transition {:?} on {:?}", event, phase);
            debug_assert!(false, "invalid frame transition");
        }
    }
}

fn shader_dirs(config: &RendererConfig) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for shader in [&config.vertex_shader, &config.fragment_shader] {
        let dir = match shader.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

pub struct RenderSystem {
    config: RendererConfig,

    // Managers; each holds the context alive until it is dropped
    shader_watcher: Option<ShaderWatcher>,
    frames: FrameSlots,
    commands: CommandSubmitter,
    pipelines: PipelineManager,
    descriptors: DescriptorManager,
    buffers: BufferManager,
    swapchains: SwapchainManager,
    context: Arc<RenderDeviceContext>,

    meshes: NamedArena<MeshHandle, Mesh>,
    scene_ubo: BufferHandle,
    object_ubo: BufferHandle,
    lighting_ubo: BufferHandle,
    object_alignment: u64,

    surface: SurfaceTracker,
    close_requested: bool,
    phase: FramePhase,
    frame_count: u64,
    shut_down: bool,
}

impl RenderSystem {
    /// Bring up the device, swapchain, uniform buffers, descriptors and the
    /// mesh pipeline. Any error here is fatal.
    pub fn initialize(
        config: RendererConfig,
        window: WindowHandles,
        surface_size: (u32, u32),
    ) -> RenderResult<Self> {
        let mut config = config;
        config.frames_in_flight = config.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        config.max_objects = config.max_objects.max(1);
        let frames_in_flight = config.frames_in_flight;

        let context = RenderDeviceContext::new(&config.app_name, config.enable_validation, window)?;
        log::info!(
            "Rendering on {} with {} frame(s) in flight",
            context.choice.device_name(),
            frames_in_flight
        );

        let mut swapchains = SwapchainManager::new(context.clone(), config.present_mode);
        if !swapchains.create(surface_size.0, surface_size.1)? {
            return Err(RenderError::ZeroSizedSurface);
        }
        let (render_pass, formats) = swapchains
            .current()
            .map(|swapchain| (swapchain.render_pass, (swapchain.format, swapchain.depth_format())))
            .ok_or(RenderError::ZeroSizedSurface)?;
        let mut surface = SurfaceTracker::new(surface_size);
        surface.rebuilt(formats);

        // Uniform buffers, one copy per frame slot
        let object_alignment = dynamic_alignment(
            size_of::<ObjectUbo>() as u64,
            context.choice.min_uniform_buffer_offset_alignment(),
        );
        let mut buffers = BufferManager::new(context.clone(), frames_in_flight)?;
        let scene_ubo = buffers.create_uniform_buffer(SCENE_UBO, size_of::<SceneUbo>() as u64)?;
        let object_ubo =
            buffers.create_uniform_buffer(OBJECT_UBO, object_alignment * config.max_objects as u64)?;
        let lighting_ubo =
            buffers.create_uniform_buffer(LIGHTING_UBO, size_of::<LightingUbo>() as u64)?;
        log::debug!(
            "Dynamic object slots: {} x {} bytes",
            config.max_objects,
            object_alignment
        );

        // One set per frame slot and nothing else
        let mut descriptors = DescriptorManager::new(
            context.clone(),
            frames_in_flight as u32,
            size_of::<ObjectUbo>() as u64,
        )?;
        descriptors.create_frame_sets(frames_in_flight as u32)?;
        for slot in 0..frames_in_flight {
            descriptors.update_object_descriptor_set(
                slot,
                &buffers,
                SCENE_UBO,
                OBJECT_UBO,
                LIGHTING_UBO,
            )?;
        }

        let mut pipelines = PipelineManager::new(context.clone());
        pipelines.create_pipeline(
            MESH_PIPELINE,
            mesh_pipeline_config(&config, render_pass, descriptors.layout()),
        )?;

        let commands = CommandSubmitter::new(context.clone())?;
        let frames = FrameSlots::new(context.clone(), commands.allocate(frames_in_flight as u32)?)?;

        let shader_watcher = if config.hot_reload_shaders {
            let dirs = shader_dirs(&config);
            match ShaderWatcher::new(dirs.iter().map(PathBuf::as_path)) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    log::warn!("Shader hot reload disabled: {}", err);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Render system initialized");

        Ok(Self {
            config,
            shader_watcher,
            frames,
            commands,
            pipelines,
            descriptors,
            buffers,
            swapchains,
            context,
            meshes: NamedArena::new(),
            scene_ubo,
            object_ubo,
            lighting_ubo,
            object_alignment,
            surface,
            close_requested: false,
            phase: FramePhase::Idle,
            frame_count: 0,
            shut_down: false,
        })
    }

    /// Render one frame.
    ///
    /// Returns `Ok(false)` when the frame was skipped (minimized window,
    /// swapchain still out of date after retries, or after shutdown).
    pub fn draw_frame(&mut self, frame: &FrameRenderData) -> RenderResult<bool> {
        if self.shut_down {
            return Ok(false);
        }

        let result = self.try_draw_frame(frame);
        if self.phase != FramePhase::Idle {
            // Error mid-frame; the next call starts over
            self.phase = FramePhase::Idle;
        }
        result
    }

    fn try_draw_frame(&mut self, frame: &FrameRenderData) -> RenderResult<bool> {
        self.reload_shaders_if_changed();

        match self.surface.before_acquire(self.swapchains.current().is_some()) {
            SwapchainAction::Keep => {}
            SwapchainAction::Skip => return Ok(false),
            SwapchainAction::Recreate => {
                if !self.recreate_swapchain()? {
                    return Ok(false);
                }
            }
        }

        let context = self.context.clone();
        let device = &context.device;
        let slot_index = self.frames.index();
        let image_available = self.frames.current().image_available;

        // Wait: the slot's previous submission must be done before reuse
        self.frames.current().wait(device)?;
        step(&mut self.phase, FrameEvent::Begin);

        // Acquire
        let mut attempts = 0;
        let image_index = loop {
            let outcome = match self.swapchains.current() {
                Some(swapchain) => swapchain.acquire_next_image(image_available)?,
                None => {
                    step(&mut self.phase, FrameEvent::Abandon);
                    return Ok(false);
                }
            };

            match outcome {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => {
                    if suboptimal {
                        // Still presentable; rebuild after this frame
                        self.surface.mark_pending();
                    }
                    break image_index;
                }
                AcquireOutcome::OutOfDate => {
                    step(&mut self.phase, FrameEvent::OutOfDate);
                    attempts += 1;
                    let retried = match after_out_of_date(attempts, MAX_ACQUIRE_ATTEMPTS) {
                        AcquireRetry::Retry => self.recreate_swapchain()?,
                        AcquireRetry::Abandon => false,
                    };
                    if !retried {
                        self.surface.mark_pending();
                        step(&mut self.phase, FrameEvent::Abandon);
                        return Ok(false);
                    }
                }
            }
        };
        step(&mut self.phase, FrameEvent::Acquired);

        if let Err(err) = self.record_and_submit(slot_index, image_index, frame) {
            // image_available is signalled and nothing will wait on it
            self.frames.release_current(&self.commands);
            step(&mut self.phase, FrameEvent::Abandon);
            return Err(err);
        }
        step(&mut self.phase, FrameEvent::Submitted);

        // Present
        step(&mut self.phase, FrameEvent::Present);
        let render_finished = self.frames.current().render_finished;
        let swapchain = self.swapchains.current().ok_or(RenderError::ZeroSizedSurface)?;
        let outcome = swapchain.present(context.present_queue, image_index, render_finished)?;
        if outcome == PresentOutcome::NeedsRecreate {
            self.surface.mark_pending();
        }
        step(&mut self.phase, FrameEvent::Presented);

        // Advance
        self.frames.advance();
        self.frame_count += 1;
        Ok(true)
    }

    /// Update uniforms, record and submit the current slot's command buffer.
    /// On error nothing was submitted and the slot's fence is still signalled
    /// unless the submit itself failed.
    fn record_and_submit(
        &self,
        slot_index: usize,
        image_index: u32,
        frame: &FrameRenderData,
    ) -> RenderResult<()> {
        let slot = self.frames.current();

        let plan = self.plan_draws(&frame.objects);
        if plan.missing > 0 {
            log::warn!("Skipped {} object(s) with unregistered meshes", plan.missing);
        }
        if plan.dropped > 0 {
            log::warn!(
                "Dropped {} object(s) over the {}-object limit",
                plan.dropped,
                self.config.max_objects
            );
        }
        self.write_uniforms(slot_index, frame, &plan)?;

        let draws: Vec<DrawCommand> = plan
            .draws
            .iter()
            .enumerate()
            .map(|(slot, draw)| DrawCommand {
                vertex_buffer: draw.vertex_buffer,
                index_buffer: draw.index_buffer,
                index_count: draw.index_count,
                dynamic_offset: (slot as u64 * self.object_alignment) as u32,
            })
            .collect();

        // Record
        let swapchain = self.swapchains.current().ok_or(RenderError::ZeroSizedSurface)?;
        let pipeline = self
            .pipelines
            .get(MESH_PIPELINE)
            .ok_or_else(|| RenderError::UnknownResource(format!("pipeline '{}'", MESH_PIPELINE)))?;
        let descriptor_set = self
            .descriptors
            .frame_set(slot_index)
            .ok_or_else(|| RenderError::UnknownResource(format!("descriptor set {}", slot_index)))?;
        let framebuffer = *swapchain
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| RenderError::UnknownResource(format!("framebuffer {}", image_index)))?;

        let pass = FramePass {
            render_pass: swapchain.render_pass,
            framebuffer,
            extent: swapchain.extent,
            clear_color: self.config.clear_color,
            pipeline,
            descriptor_set,
            draws: &draws,
        };
        self.commands.record(slot.command_buffer, &pass)?;

        // Submit; the fence is re-armed only now that submission is certain
        slot.reset(&self.context.device)?;
        self.commands.submit(
            slot.command_buffer,
            slot.image_available,
            slot.render_finished,
            slot.in_flight_fence,
        )
    }

    fn plan_draws(&self, objects: &[RenderObject]) -> DrawPlan {
        DrawPlan::build(objects, self.config.max_objects, |handle| {
            resolve_mesh(self.meshes.get(handle), |buffer| {
                self.buffers
                    .get(buffer)
                    .and_then(|entry| entry.for_frame(0))
                    .map(|gpu| gpu.buffer)
            })
        })
    }

    fn write_uniforms(&self, slot: usize, frame: &FrameRenderData, plan: &DrawPlan) -> RenderResult<()> {
        let scene = SceneUbo::from_camera(&frame.camera);
        self.buffers
            .write_uniform(self.scene_ubo, slot, 0, bytemuck::bytes_of(&scene))?;

        let lighting = LightingUbo::from_lighting(&frame.lighting);
        self.buffers
            .write_uniform(self.lighting_ubo, slot, 0, bytemuck::bytes_of(&lighting))?;

        if !plan.objects.is_empty() {
            let bytes = pack_object_slots(
                &plan.objects,
                self.object_alignment as usize,
                self.config.max_objects,
            );
            self.buffers.write_uniform(self.object_ubo, slot, 0, &bytes)?;
        }
        Ok(())
    }

    /// Rebuild the swapchain at the current surface size.
    ///
    /// Returns false (and leaves the request pending) while the surface is
    /// zero-sized.
    fn recreate_swapchain(&mut self) -> RenderResult<bool> {
        let (width, height) = self.surface.size();
        if width == 0 || height == 0 {
            self.surface.mark_pending();
            return Ok(false);
        }

        // In-flight command buffers reference the old framebuffers
        self.context.wait_idle()?;

        if !self.swapchains.recreate(width, height)? {
            self.surface.mark_pending();
            return Ok(false);
        }

        let Some(swapchain) = self.swapchains.current() else {
            self.surface.mark_pending();
            return Ok(false);
        };
        let formats = (swapchain.format, swapchain.depth_format());
        let render_pass = swapchain.render_pass;
        log::info!(
            "Swapchain recreated: {}x{}, {} image(s)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count()
        );

        // Compared against the last swapchain that existed, even if the
        // window was minimized in between
        if self.surface.rebuilt(formats) {
            log::info!("Attachment formats changed, rebuilding pipelines");
            self.pipelines.rebuild_all(Some(render_pass))?;
        }
        Ok(true)
    }

    fn reload_shaders_if_changed(&mut self) {
        let changed = self
            .shader_watcher
            .as_ref()
            .is_some_and(|watcher| watcher.poll_changed());
        if !changed {
            return;
        }

        let Some(render_pass) = self.swapchains.current().map(|s| s.render_pass) else {
            return;
        };

        log::info!("Shader change detected, rebuilding pipelines");
        if let Err(err) = self.context.wait_idle() {
            log::warn!("Skipping shader reload: {}", err);
            return;
        }
        if let Err(err) = self.pipelines.rebuild_all(Some(render_pass)) {
            log::warn!("Shader reload failed, keeping previous pipelines: {}", err);
        }
    }

    /// Upload a mesh under `name`. Re-registering a name replaces its buffers
    /// after the GPU goes idle; the returned handle stays the same.
    ///
    /// On failure nothing is registered or replaced.
    pub fn register_mesh(
        &mut self,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> RenderResult<MeshHandle> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::EmptyData { name: name.into() });
        }

        let vbo_name = format!("{}_vbo", name);
        let ibo_name = format!("{}_ibo", name);

        let vertex = self.buffers.prepare_device_local(
            &vbo_name,
            BufferKind::Vertex,
            bytemuck::cast_slice(vertices),
            vertices.len() as u32,
        )?;
        let index = match self.buffers.prepare_device_local(
            &ibo_name,
            BufferKind::Index,
            bytemuck::cast_slice(indices),
            indices.len() as u32,
        ) {
            Ok(index) => index,
            Err(err) => {
                self.buffers.discard(vertex);
                return Err(err);
            }
        };

        if self.meshes.contains(name) {
            // The buffers being replaced may still be referenced by in-flight frames
            if let Err(err) = self.context.wait_idle() {
                self.buffers.discard(vertex);
                self.buffers.discard(index);
                return Err(err);
            }
        }

        let mesh = Mesh {
            vertex_buffer: self.buffers.commit(&vbo_name, vertex),
            index_buffer: self.buffers.commit(&ibo_name, index),
            index_count: indices.len() as u32,
        };
        let (handle, replaced) = self.meshes.insert(name, mesh);

        log::info!(
            "{} mesh '{}' ({} vertices, {} indices)",
            if replaced.is_some() { "Replaced" } else { "Registered" },
            name,
            vertices.len(),
            indices.len()
        );
        Ok(handle)
    }

    /// Remove a mesh and free its buffers. Returns false if it wasn't registered.
    pub fn unregister_mesh(&mut self, name: &str) -> RenderResult<bool> {
        if !self.meshes.contains(name) {
            return Ok(false);
        }

        self.context.wait_idle()?;
        self.meshes.remove(name);
        self.buffers.destroy_buffer(&format!("{}_vbo", name));
        self.buffers.destroy_buffer(&format!("{}_ibo", name));

        log::info!("Unregistered mesh '{}'", name);
        Ok(true)
    }

    pub fn mesh_handle(&self, name: &str) -> Option<MeshHandle> {
        self.meshes.lookup(name)
    }

    /// Record a new surface size; the swapchain is rebuilt before the next acquire.
    pub fn on_surface_resized(&mut self, width: u32, height: u32) {
        self.surface.resized(width, height);
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn context(&self) -> &Arc<RenderDeviceContext> {
        &self.context
    }

    pub fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.swapchains.current().map(|swapchain| swapchain.extent)
    }

    /// Release every GPU resource. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Err(err) = self.context.wait_idle() {
            log::error!("Device wait failed during shutdown: {}", err);
        }

        self.shader_watcher = None;
        self.meshes.drain();
        self.buffers.destroy_all_buffers();
        self.pipelines.shutdown();
        self.swapchains.destroy();

        log::info!("Render system shut down after {} frame(s)", self.frame_count);
    }
}

impl Drop for RenderSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_full_pipelining_depth() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(config.present_mode, vk::PresentModeKHR::MAILBOX);
        assert!(config.max_objects > 0);
    }

    #[test]
    fn mesh_pipeline_uses_vertex_layout_and_frame_set() {
        let config = RendererConfig::default();
        let pipeline =
            mesh_pipeline_config(&config, vk::RenderPass::null(), vk::DescriptorSetLayout::null());

        assert_eq!(pipeline.vertex_bindings.len(), 1);
        assert_eq!(pipeline.vertex_bindings[0].stride, size_of::<Vertex>() as u32);
        assert_eq!(pipeline.vertex_attributes.len(), 4);
        assert_eq!(pipeline.set_layouts.len(), 1);
        assert_eq!(pipeline.vertex_shader, config.vertex_shader);
    }

    #[test]
    fn shader_dirs_are_deduplicated() {
        let config = RendererConfig::default();
        assert_eq!(shader_dirs(&config), vec![PathBuf::from("shaders")]);

        let config = RendererConfig {
            vertex_shader: PathBuf::from("mesh.vert.spv"),
            fragment_shader: PathBuf::from("assets/mesh.frag.spv"),
            ..RendererConfig::default()
        };
        assert_eq!(
            shader_dirs(&config),
            vec![PathBuf::from("."), PathBuf::from("assets")]
        );
    }

    #[test]
    fn step_follows_the_frame_protocol() {
        let mut phase = FramePhase::Idle;
        step(&mut phase, FrameEvent::Begin);
        step(&mut phase, FrameEvent::OutOfDate);
        step(&mut phase, FrameEvent::Abandon);
        assert_eq!(phase, FramePhase::Idle);
    }
}
