// =============================================================================
// FRAME CORE - GPU frame-rendering core on Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  RenderSystem (frame coordinator)                               │
// │    ├── SwapchainManager (images, depth, render pass)            │
// │    ├── BufferManager / DescriptorManager / PipelineManager      │
// │    └── CommandSubmitter + FrameSlots (fences, semaphores)       │
// │          └── RenderDeviceContext (instance, device, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire a swapchain image (recreate + retry if out of date)
// 3. Write scene, per-object and lighting uniforms for this slot
// 4. Record and submit the slot's command buffer
// 5. Present, then advance to the next slot
//
// =============================================================================

pub mod backend;
pub mod config;
pub mod error;
pub mod renderer;

/// Upper bound on frames the CPU may record ahead of the GPU.
///
/// Independent of the swapchain image count: slots are indexed by frame,
/// images by the acquire result.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

pub use backend::{RenderDeviceContext, WindowHandles};
pub use config::Config;
pub use error::{RenderError, RenderResult};
pub use renderer::{
    CameraData, FrameRenderData, LightingData, MeshHandle, PointLight, RenderObject,
    RenderSystem, RendererConfig, Vertex,
};
