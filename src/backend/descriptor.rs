// Descriptor set management
//
// One layout shared by every frame: scene UBO (binding 0), dynamic
// per-object UBO (binding 1), lighting UBO (binding 2). Each frame slot owns
// one set pointing at its own copy of the uniform buffers. The pool is sized
// once at startup for those sets; running out is a configuration error, not
// a reason to grow. Sets are written in a single batched update.

use ash::vk;
use std::sync::Arc;

use super::buffer::BufferManager;
use super::RenderDeviceContext;
use crate::error::{RenderError, RenderResult};

pub const SCENE_BINDING: u32 = 0;
pub const OBJECT_BINDING: u32 = 1;
pub const LIGHTING_BINDING: u32 = 2;

pub fn frame_layout_bindings() -> [vk::DescriptorSetLayoutBinding; 3] {
    [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SCENE_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(OBJECT_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(LIGHTING_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ]
}

/// Pool capacity for `max_sets` sets of the frame layout
pub fn pool_sizes(max_sets: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * max_sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: max_sets,
        },
    ]
}

/// CPU-side count of sets taken from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBudget {
    pub max_sets: u32,
    pub allocated: u32,
}

impl PoolBudget {
    pub fn new(max_sets: u32) -> Self {
        Self {
            max_sets,
            allocated: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.max_sets - self.allocated
    }

    pub fn reserve(&mut self, count: u32) -> RenderResult<()> {
        if count > self.available() {
            return Err(self.exhausted(count));
        }
        self.allocated += count;
        Ok(())
    }

    pub fn release(&mut self, count: u32) {
        self.allocated = self.allocated.saturating_sub(count);
    }

    fn exhausted(&self, requested: u32) -> RenderError {
        RenderError::DescriptorPoolExhausted {
            requested,
            available: self.available(),
            max_sets: self.max_sets,
        }
    }
}

pub struct DescriptorManager {
    context: Arc<RenderDeviceContext>,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    budget: PoolBudget,
    /// Byte range bound for the dynamic per-object descriptor
    object_range: vk::DeviceSize,
    frame_sets: Vec<vk::DescriptorSet>,
}

impl DescriptorManager {
    /// Create the frame layout and a pool holding at most `max_sets` sets.
    pub fn new(
        context: Arc<RenderDeviceContext>,
        max_sets: u32,
        object_range: vk::DeviceSize,
    ) -> RenderResult<Self> {
        let device = &context.device;

        let bindings = frame_layout_bindings();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }?;

        // FREE_DESCRIPTOR_SET: replaced frame sets are returned to the pool
        let sizes = pool_sizes(max_sets);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(err.into());
            }
        };

        log::debug!("Created descriptor pool for {} set(s)", max_sets);

        Ok(Self {
            context,
            layout,
            pool,
            budget: PoolBudget::new(max_sets),
            object_range,
            frame_sets: Vec::new(),
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn budget(&self) -> PoolBudget {
        self.budget
    }

    /// Allocate `count` sets of `layout` from the shared pool.
    pub fn create_descriptor_sets(
        &mut self,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        self.budget.reserve(count)?;

        let layouts = vec![layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.context.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets),
            Err(err) => {
                self.budget.release(count);
                Err(match err {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        self.budget.exhausted(count)
                    }
                    other => other.into(),
                })
            }
        }
    }

    /// Allocate one set per frame slot, replacing any previous frame sets.
    pub fn create_frame_sets(&mut self, frames: u32) -> RenderResult<()> {
        let sets = self.create_descriptor_sets(self.layout, frames)?;
        let old = std::mem::replace(&mut self.frame_sets, sets);
        self.free_sets(&old);
        Ok(())
    }

    pub fn frame_set(&self, frame: usize) -> Option<vk::DescriptorSet> {
        self.frame_sets.get(frame).copied()
    }

    /// Point frame set `set_index` at that frame's copy of the named buffers.
    ///
    /// All three bindings are written in one call, so a set is never left
    /// half-updated.
    pub fn update_object_descriptor_set(
        &self,
        set_index: usize,
        buffers: &BufferManager,
        scene: &str,
        objects: &str,
        lighting: &str,
    ) -> RenderResult<()> {
        let set = self
            .frame_set(set_index)
            .ok_or_else(|| RenderError::UnknownResource(format!("descriptor set {}", set_index)))?;
        self.write_set(set, set_index, buffers, scene, objects, lighting)
    }

    fn write_set(
        &self,
        set: vk::DescriptorSet,
        frame: usize,
        buffers: &BufferManager,
        scene: &str,
        objects: &str,
        lighting: &str,
    ) -> RenderResult<()> {
        let resolve = |name: &str| -> RenderResult<vk::DescriptorBufferInfo> {
            let buffer = buffers
                .get_by_name(name)
                .and_then(|entry| entry.for_frame(frame))
                .ok_or_else(|| RenderError::UnknownResource(name.into()))?;
            Ok(vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset: 0,
                range: buffer.size,
            })
        };

        let scene_info = [resolve(scene)?];
        let mut object_info = [resolve(objects)?];
        // Dynamic binding sees one object's worth; the offset picks which
        object_info[0].range = self.object_range;
        let lighting_info = [resolve(lighting)?];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SCENE_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&scene_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(OBJECT_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&object_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(LIGHTING_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&lighting_info)
                .build(),
        ];

        unsafe { self.context.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    fn free_sets(&mut self, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }
        if let Err(err) = unsafe { self.context.device.free_descriptor_sets(self.pool, sets) } {
            log::warn!("Failed to free {} descriptor set(s): {}", sets.len(), err);
        }
        self.budget.release(sets.len() as u32);
    }
}

impl Drop for DescriptorManager {
    fn drop(&mut self) {
        // Destroying the pool frees every set allocated from it
        unsafe {
            self.context
                .device
                .destroy_descriptor_pool(self.pool, None);
            self.context
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_has_dynamic_object_binding() {
        let bindings = frame_layout_bindings();
        assert_eq!(bindings.len(), 3);

        assert_eq!(bindings[0].binding, SCENE_BINDING);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);

        assert_eq!(bindings[1].binding, OBJECT_BINDING);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        assert!(bindings[1]
            .stage_flags
            .contains(vk::ShaderStageFlags::VERTEX));

        assert_eq!(bindings[2].binding, LIGHTING_BINDING);
        assert_eq!(bindings[2].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_holds_every_binding_of_every_set() {
        let sizes = pool_sizes(8);
        let plain: u32 = sizes
            .iter()
            .filter(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .map(|s| s.descriptor_count)
            .sum();
        let dynamic: u32 = sizes
            .iter()
            .filter(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .map(|s| s.descriptor_count)
            .sum();
        assert_eq!(plain, 16);
        assert_eq!(dynamic, 8);
    }

    #[test]
    fn budget_reserves_until_exhausted() {
        let mut budget = PoolBudget::new(4);
        budget.reserve(3).unwrap();
        assert_eq!(budget.available(), 1);

        let err = budget.reserve(2).unwrap_err();
        assert!(matches!(
            err,
            RenderError::DescriptorPoolExhausted {
                requested: 2,
                available: 1,
                max_sets: 4
            }
        ));
        // Failed reservation leaves the count alone
        assert_eq!(budget.allocated, 3);

        budget.release(3);
        budget.reserve(4).unwrap();
        assert_eq!(budget.available(), 0);
    }

    #[test]
    fn release_never_underflows() {
        let mut budget = PoolBudget::new(2);
        budget.release(5);
        assert_eq!(budget.allocated, 0);
    }
}
