// Uniform buffer layouts shared with shaders/mesh.vert and shaders/mesh.frag
//
// All structs are #[repr(C)] and follow std140: Mat4 is 64 bytes, vec3 data
// is widened to Vec4 to keep 16-byte alignment without hidden padding.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use super::frame::{CameraData, LightingData, RenderObject, MAX_LIGHTS};

/// Binding 0: camera matrices
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 64   | view |
/// | 64     | 64   | projection |
/// | 128    | 64   | view_projection |
/// | 192    | 16   | camera_position (w unused) |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SceneUbo {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec4,
}

impl SceneUbo {
    pub fn from_camera(camera: &CameraData) -> Self {
        Self {
            view: camera.view,
            projection: camera.projection,
            view_projection: camera.projection * camera.view,
            camera_position: camera.position.extend(1.0),
        }
    }
}

/// Binding 1 (dynamic): one slot per drawn object
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ObjectUbo {
    pub model: Mat4,
    /// Inverse-transpose of the model matrix, for normals
    pub normal_matrix: Mat4,
    pub color: Vec4,
}

impl ObjectUbo {
    pub fn from_object(object: &RenderObject) -> Self {
        Self {
            model: object.transform,
            normal_matrix: object.transform.inverse().transpose(),
            color: object.color,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightUbo {
    pub position: Vec4,
    /// rgb color, w = intensity
    pub color: Vec4,
}

/// Binding 2: up to four point lights plus ambient
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightingUbo {
    pub lights: [LightUbo; MAX_LIGHTS],
    pub ambient: Vec4,
    pub light_count: u32,
    pub _padding: [u32; 3],
}

impl LightingUbo {
    pub fn from_lighting(lighting: &LightingData) -> Self {
        let mut ubo = Self {
            ambient: lighting.ambient.extend(1.0),
            ..Default::default()
        };

        for (slot, light) in ubo.lights.iter_mut().zip(&lighting.lights) {
            *slot = LightUbo {
                position: light.position.extend(1.0),
                color: light.color.extend(light.intensity),
            };
        }
        ubo.light_count = lighting.lights.len().min(MAX_LIGHTS) as u32;
        ubo
    }
}

/// Pack objects into `alignment`-strided slots for the dynamic buffer.
///
/// Slot `i` starts at `i * alignment`. The result never exceeds
/// `capacity * alignment` bytes; extra objects are not written.
pub fn pack_object_slots<'a>(
    objects: impl IntoIterator<Item = &'a ObjectUbo>,
    alignment: usize,
    capacity: usize,
) -> Vec<u8> {
    let stride = alignment.max(std::mem::size_of::<ObjectUbo>());
    let mut bytes = Vec::new();

    for object in objects.into_iter().take(capacity) {
        let start = bytes.len();
        bytes.resize(start + stride, 0);
        bytes[start..start + std::mem::size_of::<ObjectUbo>()]
            .copy_from_slice(bytemuck::bytes_of(object));
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::dynamic_alignment;
    use crate::renderer::frame::PointLight;
    use glam::Vec3;
    use std::mem::{align_of, size_of};

    #[test]
    fn scene_ubo_layout() {
        assert_eq!(size_of::<SceneUbo>(), 208);
        assert_eq!(std::mem::offset_of!(SceneUbo, camera_position), 192);
    }

    #[test]
    fn object_ubo_layout() {
        assert_eq!(size_of::<ObjectUbo>(), 144);
        assert_eq!(size_of::<ObjectUbo>() % 16, 0);
        assert!(align_of::<ObjectUbo>() <= 16);
    }

    #[test]
    fn lighting_ubo_layout() {
        assert_eq!(size_of::<LightUbo>(), 32);
        assert_eq!(size_of::<LightingUbo>(), 160);
        assert_eq!(std::mem::offset_of!(LightingUbo, ambient), 128);
        assert_eq!(std::mem::offset_of!(LightingUbo, light_count), 144);
    }

    #[test]
    fn view_projection_is_projection_times_view() {
        let camera = CameraData {
            view: Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_rh(45f32.to_radians(), 4.0 / 3.0, 0.1, 100.0),
            position: Vec3::new(0.0, 2.0, 5.0),
        };
        let ubo = SceneUbo::from_camera(&camera);
        assert_eq!(ubo.view_projection, camera.projection * camera.view);
        assert_eq!(ubo.camera_position, Vec4::new(0.0, 2.0, 5.0, 1.0));
    }

    #[test]
    fn extra_lights_are_ignored() {
        let light = PointLight {
            position: Vec3::ONE,
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 2.0,
        };
        let lighting = LightingData {
            lights: vec![light; 6],
            ambient: Vec3::splat(0.2),
        };

        let ubo = LightingUbo::from_lighting(&lighting);
        assert_eq!(ubo.light_count, 4);
        assert_eq!(ubo.lights[3].color, Vec4::new(1.0, 0.5, 0.25, 2.0));
        assert_eq!(ubo.ambient.truncate(), Vec3::splat(0.2));
    }

    #[test]
    fn slots_are_strided_by_alignment() {
        let alignment = dynamic_alignment(size_of::<ObjectUbo>() as u64, 256) as usize;
        let first = ObjectUbo {
            color: Vec4::ONE,
            ..Default::default()
        };
        let objects = [first, ObjectUbo::default()];

        let bytes = pack_object_slots(&objects, alignment, 10);
        assert_eq!(bytes.len(), 2 * 256);

        let color_offset = std::mem::offset_of!(ObjectUbo, color);
        let color: Vec4 = bytemuck::pod_read_unaligned(&bytes[color_offset..color_offset + 16]);
        assert_eq!(color, Vec4::ONE);
    }

    #[test]
    fn packing_stops_at_capacity() {
        // 101 objects into a 100-slot buffer
        let objects = vec![ObjectUbo::default(); 101];
        let bytes = pack_object_slots(&objects, 256, 100);
        assert_eq!(bytes.len(), 100 * 256);
    }
}
