// Error taxonomy for the rendering core
//
// Three classes of failure:
// - fatal: startup can't continue (no device, missing extensions, bad shaders)
// - resource: a single Create* call failed, the caller decides what to skip
// - transient: swapchain out-of-date/suboptimal, never surfaced as an error

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::buffer::BufferKind;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableDevice,

    #[error("Missing required device extensions: {}", .0.join(", "))]
    MissingExtensions(Vec<String>),

    #[error("Operation requires a presentation surface but the context is headless")]
    NoSurface,

    #[error("No memory type matches filter {type_filter:#b} with flags {flags:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("Surface has zero size; no swapchain can be created")]
    ZeroSizedSurface,

    #[error("No supported depth attachment format")]
    NoDepthFormat,

    #[error("Descriptor pool exhausted: {requested} set(s) requested, {available} of {max_sets} left")]
    DescriptorPoolExhausted {
        requested: u32,
        available: u32,
        max_sets: u32,
    },

    #[error("Failed to load shader {}: {reason}", path.display())]
    Shader { path: PathBuf, reason: String },

    #[error("Refusing to create '{name}' from empty data")]
    EmptyData { name: String },

    #[error("Buffer '{name}' already exists as a {existing:?} buffer, not {requested:?}")]
    KindMismatch {
        name: String,
        existing: BufferKind,
        requested: BufferKind,
    },

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Write of {len} bytes at offset {offset} exceeds '{name}' ({size} bytes)")]
    OutOfRange {
        name: String,
        offset: u64,
        len: u64,
        size: u64,
    },
}

impl RenderError {
    /// Fatal errors abort startup; everything else is a per-resource failure
    /// the caller can recover from by skipping that resource.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::EmptyData { .. }
            | RenderError::KindMismatch { .. }
            | RenderError::UnknownResource(_)
            | RenderError::OutOfRange { .. }
            | RenderError::NoSuitableMemoryType { .. } => false,
            RenderError::Allocator(gpu_allocator::AllocationError::OutOfMemory) => false,
            RenderError::Vulkan(result) => !matches!(
                *result,
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ),
            _ => true,
        }
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_errors_are_recoverable() {
        let empty = RenderError::EmptyData { name: "cube_vbo".into() };
        assert!(!empty.is_fatal());

        let oom = RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(!oom.is_fatal());

        let mismatch = RenderError::KindMismatch {
            name: "cube".into(),
            existing: BufferKind::Index,
            requested: BufferKind::Vertex,
        };
        assert!(!mismatch.is_fatal());
    }

    #[test]
    fn startup_errors_are_fatal() {
        assert!(RenderError::NoSuitableDevice.is_fatal());
        assert!(RenderError::MissingExtensions(vec!["VK_KHR_swapchain".into()]).is_fatal());
        assert!(RenderError::DescriptorPoolExhausted {
            requested: 1,
            available: 0,
            max_sets: 4
        }
        .is_fatal());
        assert!(RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_fatal());
    }

    #[test]
    fn messages_name_the_resource() {
        let err = RenderError::OutOfRange {
            name: "scene_ubo".into(),
            offset: 16,
            len: 512,
            size: 256,
        };
        let text = err.to_string();
        assert!(text.contains("scene_ubo"));
        assert!(text.contains("512"));

        let err = RenderError::MissingExtensions(vec!["A".into(), "B".into()]);
        assert_eq!(err.to_string(), "Missing required device extensions: A, B");
    }
}
