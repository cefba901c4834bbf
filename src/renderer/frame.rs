// Per-frame inputs from the scene layer, plus the vertex format meshes use

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::backend::BufferHandle;

/// Lights beyond this count are ignored
pub const MAX_LIGHTS: usize = 4;

/// Interleaved mesh vertex: position, normal, color, uv
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, color: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            color,
            uv,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        [
            // Position at location 0
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            // Normal at location 1
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            // Color at location 2
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 24,
            },
            // UV at location 3
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 3,
                format: vk::Format::R32G32_SFLOAT,
                offset: 36,
            },
        ]
    }
}

/// GPU buffers backing a registered mesh
#[derive(Debug, Clone, Copy)]
pub struct Mesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

slotmap::new_key_type! {
    /// Stable key for a registered mesh
    pub struct MeshHandle;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderObject {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    pub color: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightingData {
    /// Only the first [`MAX_LIGHTS`] are used
    pub lights: Vec<PointLight>,
    pub ambient: Vec3,
}

impl Default for LightingData {
    fn default() -> Self {
        Self {
            lights: Vec::new(),
            ambient: Vec3::splat(0.1),
        }
    }
}

/// Everything the scene layer hands over for one frame
#[derive(Debug, Clone, Default)]
pub struct FrameRenderData {
    pub camera: CameraData,
    pub objects: Vec<RenderObject>,
    pub lighting: LightingData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        // 3 x Vec3 + Vec2 = 44 bytes
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        assert_eq!(Vertex::binding_description().stride, 44);
    }

    #[test]
    fn attributes_match_field_offsets() {
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].offset as usize, std::mem::offset_of!(Vertex, position));
        assert_eq!(attrs[1].offset as usize, std::mem::offset_of!(Vertex, normal));
        assert_eq!(attrs[2].offset as usize, std::mem::offset_of!(Vertex, color));
        assert_eq!(attrs[3].offset as usize, std::mem::offset_of!(Vertex, uv));

        for (i, attr) in attrs.iter().enumerate() {
            assert_eq!(attr.location, i as u32);
            assert_eq!(attr.binding, 0);
        }
    }

    #[test]
    fn vertices_cast_to_bytes() {
        let verts = [Vertex::default(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&verts);
        assert_eq!(bytes.len(), 3 * 44);
    }
}
