// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Pipelines are described by plain data (PipelineConfig) so they can be
// rebuilt after a shader reload or a swapchain format change.

use ash::vk;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::shader::load_shader_module;
use super::RenderDeviceContext;
use crate::error::RenderResult;

/// Everything needed to build one graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,

    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,

    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,

    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub alpha_blend: bool,

    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    /// Viewport and scissor are dynamic so resizes don't force a rebuild
    pub dynamic_states: Vec<vk::DynamicState>,

    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineConfig {
    /// Opaque, depth-tested, back-face-culled triangles
    pub fn new(
        vertex_shader: impl Into<PathBuf>,
        fragment_shader: impl Into<PathBuf>,
        render_pass: vk::RenderPass,
    ) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS, // Closer objects win
            alpha_blend: false,
            render_pass,
            subpass: 0,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }
}

fn color_blend_attachment(alpha_blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(alpha_blend);

    if alpha_blend {
        builder
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    } else {
        builder.build()
    }
}

/// A built pipeline and its layout
#[derive(Debug, Clone, Copy)]
pub struct PipelineHandle {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

fn build_pipeline(device: &ash::Device, config: &PipelineConfig) -> RenderResult<PipelineHandle> {
    // Shader modules are only needed until the pipeline exists
    let vert_module = load_shader_module(device, &config.vertex_shader)?;
    let frag_module = match load_shader_module(device, &config.fragment_shader) {
        Ok(module) => module,
        Err(err) => {
            unsafe { device.destroy_shader_module(vert_module, None) };
            return Err(err);
        }
    };

    let result = build_with_modules(device, config, vert_module, frag_module);

    unsafe {
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
    }
    result
}

fn build_with_modules(
    device: &ash::Device,
    config: &PipelineConfig,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
) -> RenderResult<PipelineHandle> {
    let entry_point = c"main";

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(entry_point)
            .build(),
    ];

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&config.vertex_bindings)
        .vertex_attribute_descriptions(&config.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(config.topology)
        .primitive_restart_enable(false);

    // Counts only; the actual rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(config.polygon_mode)
        .line_width(1.0)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_write)
        .depth_compare_op(config.depth_compare)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [color_blend_attachment(config.alpha_blend)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&config.dynamic_states);

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&config.set_layouts)
        .push_constant_ranges(&config.push_constant_ranges);

    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(config.render_pass)
        .subpass(config.subpass)
        .build();

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    match pipelines {
        Ok(pipelines) => Ok(PipelineHandle {
            pipeline: pipelines[0],
            layout,
        }),
        Err((_, err)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(err.into())
        }
    }
}

struct PipelineEntry {
    config: PipelineConfig,
    handle: PipelineHandle,
}

/// Named graphics pipelines with their source configs
pub struct PipelineManager {
    context: Arc<RenderDeviceContext>,
    pipelines: HashMap<String, PipelineEntry>,
}

impl PipelineManager {
    pub fn new(context: Arc<RenderDeviceContext>) -> Self {
        Self {
            context,
            pipelines: HashMap::new(),
        }
    }

    /// Build a pipeline and store it under `name`, replacing any previous one.
    ///
    /// The caller must ensure a replaced pipeline is no longer in use.
    pub fn create_pipeline(&mut self, name: &str, config: PipelineConfig) -> RenderResult<PipelineHandle> {
        let handle = build_pipeline(&self.context.device, &config)?;
        log::info!("Created pipeline '{}'", name);

        if let Some(old) = self
            .pipelines
            .insert(name.to_owned(), PipelineEntry { config, handle })
        {
            self.destroy_handle(old.handle);
        }
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<&PipelineHandle> {
        self.pipelines.get(name).map(|entry| &entry.handle)
    }

    pub fn config(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(name).map(|entry| &entry.config)
    }

    /// Rebuild every pipeline from its stored config, optionally against a new
    /// render pass. All-or-nothing: if any build fails the old pipelines stay.
    ///
    /// The caller must have idled the device.
    pub fn rebuild_all(&mut self, render_pass: Option<vk::RenderPass>) -> RenderResult<()> {
        let device = &self.context.device;
        let mut rebuilt = Vec::with_capacity(self.pipelines.len());

        for (name, entry) in &self.pipelines {
            let mut config = entry.config.clone();
            if let Some(render_pass) = render_pass {
                config.render_pass = render_pass;
            }

            match build_pipeline(device, &config) {
                Ok(handle) => rebuilt.push((name.clone(), config, handle)),
                Err(err) => {
                    log::error!("Rebuilding pipeline '{}' failed, keeping the old ones: {}", name, err);
                    for (_, _, handle) in rebuilt {
                        self.destroy_handle(handle);
                    }
                    return Err(err);
                }
            }
        }

        for (name, config, handle) in rebuilt {
            if let Some(old) = self.pipelines.insert(name, PipelineEntry { config, handle }) {
                self.destroy_handle(old.handle);
            }
        }
        log::info!("Rebuilt {} pipeline(s)", self.pipelines.len());
        Ok(())
    }

    pub fn destroy_pipeline(&mut self, name: &str) -> bool {
        match self.pipelines.remove(name) {
            Some(entry) => {
                self.destroy_handle(entry.handle);
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&mut self) {
        let handles: Vec<PipelineHandle> = self.pipelines.drain().map(|(_, e)| e.handle).collect();
        for handle in handles {
            self.destroy_handle(handle);
        }
    }

    fn destroy_handle(&self, handle: PipelineHandle) {
        unsafe {
            self.context.device.destroy_pipeline(handle.pipeline, None);
            self.context
                .device
                .destroy_pipeline_layout(handle.layout, None);
        }
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_opaque_depth_tested_triangles() {
        let config = PipelineConfig::new("a.vert.spv", "a.frag.spv", vk::RenderPass::null());

        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.cull_mode, vk::CullModeFlags::BACK);
        assert!(config.depth_test && config.depth_write);
        assert_eq!(config.depth_compare, vk::CompareOp::LESS);
        assert!(!config.alpha_blend);
        assert_eq!(config.subpass, 0);
    }

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        let config = PipelineConfig::new("a.vert.spv", "a.frag.spv", vk::RenderPass::null());
        assert!(config.dynamic_states.contains(&vk::DynamicState::VIEWPORT));
        assert!(config.dynamic_states.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn blend_state_follows_flag() {
        let opaque = color_blend_attachment(false);
        assert_eq!(opaque.blend_enable, vk::FALSE);
        assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);

        let blended = color_blend_attachment(true);
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blended.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }
}
