// Vulkan backend: device, presentation, resources, and submission

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod handle;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::{BufferHandle, BufferKind, BufferManager};
pub use command::CommandSubmitter;
pub use descriptor::DescriptorManager;
pub use device::{RenderDeviceContext, WindowHandles};
pub use pipeline::{PipelineConfig, PipelineHandle, PipelineManager};
pub use selector::{DeviceSelector, PhysicalDeviceChoice};
pub use swapchain::{Swapchain, SwapchainManager};
