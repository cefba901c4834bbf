// Buffer manager for vertex, index, and uniform buffers
//
// Vertex and index data goes through a host-visible staging buffer into
// device-local memory. Uniform buffers are host-visible and duplicated per
// frame in flight so the CPU never writes memory the GPU is still reading.
// Buffers are addressed by name at the boundary and by handle internally.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::command::{create_command_pool, submit_one_shot};
use super::handle::NamedArena;
use super::RenderDeviceContext;
use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            // TRANSFER_SRC lets device-local buffers be read back through staging
            BufferKind::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferKind::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => {
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
            }
        }
    }

    pub fn memory_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferKind::Vertex | BufferKind::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferKind::Uniform | BufferKind::Staging => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    pub fn is_host_visible(self) -> bool {
        self.memory_flags()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

/// A raw buffer plus its dedicated memory
#[derive(Debug, Clone, Copy)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// Registry entry: one buffer, or one per frame in flight for uniforms
#[derive(Debug)]
pub struct BufferEntry {
    pub kind: BufferKind,
    pub buffers: Vec<GpuBuffer>,
    /// Element count for vertex/index buffers, 0 for uniforms
    pub count: u32,
}

impl BufferEntry {
    pub fn size(&self) -> vk::DeviceSize {
        self.buffers.first().map_or(0, |b| b.size)
    }

    /// Buffer used by `frame`; single-copy buffers ignore the index
    pub fn for_frame(&self, frame: usize) -> Option<&GpuBuffer> {
        if self.buffers.len() == 1 {
            self.buffers.first()
        } else {
            self.buffers.get(frame)
        }
    }
}

slotmap::new_key_type! {
    /// Stable key for a named buffer; goes stale once the buffer is destroyed
    pub struct BufferHandle;
}

/// Find a memory type index allowed by `type_filter` that has all of `flags`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let allowed = (type_filter & (1 << i)) != 0;
        allowed
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(flags)
    })
}

/// Round `struct_size` up to the device's minimum uniform offset alignment.
pub fn dynamic_alignment(struct_size: u64, min_alignment: u64) -> u64 {
    if min_alignment == 0 {
        return struct_size;
    }
    (struct_size + min_alignment - 1) & !(min_alignment - 1)
}

/// Validate a create call before touching the GPU or the registry
fn check_create(
    name: &str,
    byte_len: u64,
    existing: Option<BufferKind>,
    requested: BufferKind,
) -> RenderResult<()> {
    if byte_len == 0 {
        return Err(RenderError::EmptyData { name: name.into() });
    }
    match existing {
        Some(existing) if existing != requested => Err(RenderError::KindMismatch {
            name: name.into(),
            existing,
            requested,
        }),
        _ => Ok(()),
    }
}

fn check_range(name: &str, offset: u64, len: u64, size: u64) -> RenderResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RenderError::OutOfRange {
            name: name.into(),
            offset,
            len,
            size,
        }),
    }
}

pub struct BufferManager {
    context: Arc<RenderDeviceContext>,
    transfer_pool: vk::CommandPool,
    buffers: NamedArena<BufferHandle, BufferEntry>,
    frames_in_flight: usize,
}

impl BufferManager {
    pub fn new(context: Arc<RenderDeviceContext>, frames_in_flight: usize) -> RenderResult<Self> {
        // TRANSIENT: upload command buffers are allocated, used once, and freed
        let transfer_pool = create_command_pool(
            &context.device,
            context.choice.graphics_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            context,
            transfer_pool,
            buffers: NamedArena::new(),
            frames_in_flight: frames_in_flight.max(1),
        })
    }

    /// Upload `vertices` into a device-local vertex buffer named `name`.
    pub fn create_vertex_buffer<T: Pod>(
        &mut self,
        name: &str,
        vertices: &[T],
    ) -> RenderResult<BufferHandle> {
        self.create_device_local(
            name,
            BufferKind::Vertex,
            bytemuck::cast_slice(vertices),
            vertices.len() as u32,
        )
    }

    /// Upload 32-bit `indices` into a device-local index buffer named `name`.
    pub fn create_index_buffer(&mut self, name: &str, indices: &[u32]) -> RenderResult<BufferHandle> {
        self.create_device_local(
            name,
            BufferKind::Index,
            bytemuck::cast_slice(indices),
            indices.len() as u32,
        )
    }

    fn create_device_local(
        &mut self,
        name: &str,
        kind: BufferKind,
        bytes: &[u8],
        count: u32,
    ) -> RenderResult<BufferHandle> {
        let entry = self.prepare_device_local(name, kind, bytes, count)?;
        Ok(self.commit(name, entry))
    }

    /// Upload `bytes` into a device-local buffer without registering it.
    ///
    /// Pair with [`commit`](Self::commit) to publish several buffers at once,
    /// or [`discard`](Self::discard) to drop it.
    pub fn prepare_device_local(
        &self,
        name: &str,
        kind: BufferKind,
        bytes: &[u8],
        count: u32,
    ) -> RenderResult<BufferEntry> {
        let size = bytes.len() as vk::DeviceSize;
        check_create(name, size, self.kind_of(name), kind)?;

        let staging = self.create_raw(size, BufferKind::Staging)?;
        let result = self.write_mapped(&staging, 0, bytes).and_then(|()| {
            let target = self.create_raw(size, kind)?;
            match self.copy_buffer(staging.buffer, target.buffer, size) {
                Ok(()) => Ok(target),
                Err(err) => {
                    self.destroy_raw(&target);
                    Err(err)
                }
            }
        });
        self.destroy_raw(&staging);
        let target = result?;

        log::debug!("Uploaded {:?} buffer '{}' ({} bytes)", kind, name, size);
        Ok(BufferEntry {
            kind,
            buffers: vec![target],
            count,
        })
    }

    /// Register a prepared buffer under `name`, replacing a same-named one.
    pub fn commit(&mut self, name: &str, entry: BufferEntry) -> BufferHandle {
        self.insert(name, entry)
    }

    pub fn discard(&self, entry: BufferEntry) {
        self.destroy_entry(&entry);
    }

    /// Create one host-visible uniform buffer of `size` bytes per frame in flight.
    pub fn create_uniform_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
    ) -> RenderResult<BufferHandle> {
        check_create(name, size, self.kind_of(name), BufferKind::Uniform)?;

        let mut buffers = Vec::with_capacity(self.frames_in_flight);
        for _ in 0..self.frames_in_flight {
            match self.create_raw(size, BufferKind::Uniform) {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    for buffer in &buffers {
                        self.destroy_raw(buffer);
                    }
                    return Err(err);
                }
            }
        }

        let entry = BufferEntry {
            kind: BufferKind::Uniform,
            buffers,
            count: 0,
        };
        log::debug!(
            "Created uniform buffer '{}' ({} bytes x {})",
            name,
            size,
            self.frames_in_flight
        );
        Ok(self.insert(name, entry))
    }

    /// Copy `data` into the uniform buffer `name` for `frame`.
    pub fn update_uniform_buffer(&self, name: &str, frame: usize, data: &[u8]) -> RenderResult<()> {
        let handle = self
            .lookup(name)
            .ok_or_else(|| RenderError::UnknownResource(name.into()))?;
        self.write_uniform(handle, frame, 0, data)
    }

    /// Copy `data` at byte `offset` into the frame's copy of a uniform buffer.
    pub fn write_uniform(
        &self,
        handle: BufferHandle,
        frame: usize,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RenderResult<()> {
        let entry = self
            .buffers
            .get(handle)
            .ok_or_else(|| RenderError::UnknownResource(format!("{:?}", handle)))?;
        let buffer = entry
            .for_frame(frame)
            .ok_or_else(|| RenderError::UnknownResource(format!("{:?} frame {}", handle, frame)))?;

        if !entry.kind.is_host_visible() {
            return Err(RenderError::KindMismatch {
                name: format!("{:?}", handle),
                existing: entry.kind,
                requested: BufferKind::Uniform,
            });
        }
        check_range(
            &format!("{:?}", handle),
            offset,
            data.len() as u64,
            buffer.size,
        )?;
        self.write_mapped(buffer, offset, data)
    }

    /// Read a buffer's full contents back to the host.
    ///
    /// Device-local buffers go through a temporary staging copy; uniform
    /// buffers return frame 0's copy. Blocks on the graphics queue.
    pub fn read_back(&self, name: &str) -> RenderResult<Vec<u8>> {
        let entry = self
            .buffers
            .get_by_name(name)
            .ok_or_else(|| RenderError::UnknownResource(name.into()))?;
        let source = entry
            .buffers
            .first()
            .ok_or_else(|| RenderError::UnknownResource(name.into()))?;

        if entry.kind.is_host_visible() {
            return self.read_mapped(source);
        }

        let staging = self.create_raw(source.size, BufferKind::Staging)?;
        let result = self
            .copy_buffer(source.buffer, staging.buffer, source.size)
            .and_then(|()| self.read_mapped(&staging));
        self.destroy_raw(&staging);
        result
    }

    /// Destroy `name`. Returns false if no such buffer existed.
    pub fn destroy_buffer(&mut self, name: &str) -> bool {
        match self.buffers.remove(name) {
            Some(entry) => {
                self.destroy_entry(&entry);
                log::debug!("Destroyed buffer '{}'", name);
                true
            }
            None => false,
        }
    }

    pub fn destroy_all_buffers(&mut self) {
        for entry in self.buffers.drain() {
            self.destroy_entry(&entry);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<BufferHandle> {
        self.buffers.lookup(name)
    }

    pub fn get(&self, handle: BufferHandle) -> Option<&BufferEntry> {
        self.buffers.get(handle)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&BufferEntry> {
        self.buffers.get_by_name(name)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn kind_of(&self, name: &str) -> Option<BufferKind> {
        self.buffers.get_by_name(name).map(|entry| entry.kind)
    }

    // Same-kind replacement: the new entry is fully built before the old one goes
    fn insert(&mut self, name: &str, entry: BufferEntry) -> BufferHandle {
        let (handle, replaced) = self.buffers.insert(name, entry);
        if let Some(old) = replaced {
            log::debug!("Replaced buffer '{}'", name);
            self.destroy_entry(&old);
        }
        handle
    }

    fn create_raw(&self, size: vk::DeviceSize, kind: BufferKind) -> RenderResult<GpuBuffer> {
        let device = &self.context.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = (|| -> RenderResult<vk::DeviceMemory> {
            let memory_type_index = find_memory_type(
                self.context.memory_properties(),
                requirements.memory_type_bits,
                kind.memory_flags(),
            )
            .ok_or(RenderError::NoSuitableMemoryType {
                type_filter: requirements.memory_type_bits,
                flags: kind.memory_flags(),
            })?;

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);

            let memory = unsafe { device.allocate_memory(&alloc_info, None) }?;
            if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
                unsafe { device.free_memory(memory, None) };
                return Err(err.into());
            }
            Ok(memory)
        })();

        match memory {
            Ok(memory) => Ok(GpuBuffer {
                buffer,
                memory,
                size,
            }),
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                Err(err)
            }
        }
    }

    fn destroy_raw(&self, buffer: &GpuBuffer) {
        unsafe {
            self.context.device.destroy_buffer(buffer.buffer, None);
            self.context.device.free_memory(buffer.memory, None);
        }
    }

    fn destroy_entry(&self, entry: &BufferEntry) {
        for buffer in &entry.buffers {
            self.destroy_raw(buffer);
        }
    }

    fn write_mapped(&self, buffer: &GpuBuffer, offset: vk::DeviceSize, data: &[u8]) -> RenderResult<()> {
        let device = &self.context.device;
        unsafe {
            let ptr = device.map_memory(
                buffer.memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )? as *mut u8;
            ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
            device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn read_mapped(&self, buffer: &GpuBuffer) -> RenderResult<Vec<u8>> {
        let device = &self.context.device;
        let mut out = vec![0u8; buffer.size as usize];
        unsafe {
            let ptr = device.map_memory(buffer.memory, 0, buffer.size, vk::MemoryMapFlags::empty())?
                as *const u8;
            ptr.copy_to_nonoverlapping(out.as_mut_ptr(), out.len());
            device.unmap_memory(buffer.memory);
        }
        Ok(out)
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> RenderResult<()> {
        let device = &self.context.device;
        submit_one_shot(device, self.transfer_pool, self.context.graphics_queue, |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        })
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Callers idle the device before tearing down resources
        self.destroy_all_buffers();
        unsafe {
            self.context
                .device
                .destroy_command_pool(self.transfer_pool, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let host = BufferKind::Uniform.memory_flags();
        assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
        assert_eq!(
            find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(2)
        );
        assert_eq!(find_memory_type(&props, 0b001, host), None);
    }

    #[test]
    fn dynamic_alignment_rounds_up() {
        assert_eq!(dynamic_alignment(144, 256), 256);
        assert_eq!(dynamic_alignment(256, 256), 256);
        assert_eq!(dynamic_alignment(272, 256), 512);
        assert_eq!(dynamic_alignment(144, 64), 192);
        assert_eq!(dynamic_alignment(144, 0), 144);
    }

    #[test]
    fn usage_flags_per_kind() {
        assert!(BufferKind::Vertex
            .usage()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert!(BufferKind::Index
            .usage()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(BufferKind::Uniform
            .usage()
            .contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(BufferKind::Uniform.is_host_visible());
        assert!(!BufferKind::Vertex.is_host_visible());
    }

    #[test]
    fn empty_data_is_rejected() {
        let err = check_create("cube_vbo", 0, None, BufferKind::Vertex).unwrap_err();
        assert!(matches!(err, RenderError::EmptyData { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn name_collision_requires_same_kind() {
        assert!(check_create("cube", 64, Some(BufferKind::Vertex), BufferKind::Vertex).is_ok());

        let err = check_create("cube", 64, Some(BufferKind::Vertex), BufferKind::Index).unwrap_err();
        assert!(matches!(
            err,
            RenderError::KindMismatch {
                existing: BufferKind::Vertex,
                requested: BufferKind::Index,
                ..
            }
        ));
    }

    #[test]
    fn writes_must_fit_the_buffer() {
        assert!(check_range("scene", 0, 256, 256).is_ok());
        assert!(check_range("scene", 128, 128, 256).is_ok());
        assert!(check_range("scene", 128, 129, 256).is_err());
        assert!(check_range("scene", u64::MAX, 1, 256).is_err());
    }
}
