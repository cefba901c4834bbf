// Frame phase tracking and per-frame draw planning

use ash::vk;

use super::frame::{Mesh, MeshHandle, RenderObject};
use crate::backend::BufferHandle;
use super::uniforms::ObjectUbo;

/// Where the coordinator is within one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Fence waited, about to acquire
    Begin,
    Acquired,
    /// Acquire reported out-of-date; retry after recreation
    OutOfDate,
    Submitted,
    Present,
    Presented,
    /// Frame dropped before submission (minimized, error, retries exhausted)
    Abandon,
}

impl FramePhase {
    /// Next phase for `event`, or None if the transition is not allowed.
    pub fn on(self, event: FrameEvent) -> Option<FramePhase> {
        use FrameEvent as E;
        use FramePhase as P;

        match (self, event) {
            (P::Idle, E::Begin) => Some(P::Acquiring),
            (P::Acquiring, E::Acquired) => Some(P::Recording),
            (P::Acquiring, E::OutOfDate) => Some(P::Acquiring),
            (P::Recording, E::Submitted) => Some(P::Submitted),
            (P::Submitted, E::Present) => Some(P::Presenting),
            (P::Presenting, E::Presented) => Some(P::Idle),
            // Nothing has reached the GPU yet, so the slot can be reused as is
            (P::Acquiring | P::Recording, E::Abandon) => Some(P::Idle),
            _ => None,
        }
    }
}

/// What to do with the swapchain before acquiring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainAction {
    Keep,
    Recreate,
    /// Zero-sized surface; skip the frame and keep recreation pending
    Skip,
}

/// Outcome of an out-of-date acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireRetry {
    /// Recreate the swapchain and acquire again
    Retry,
    /// Give up on this frame
    Abandon,
}

/// `attempts` counts the out-of-date results seen so far this frame.
pub fn after_out_of_date(attempts: usize, max_attempts: usize) -> AcquireRetry {
    if attempts >= max_attempts {
        AcquireRetry::Abandon
    } else {
        AcquireRetry::Retry
    }
}

/// Surface size, whether the swapchain must be rebuilt, and the attachment
/// formats of the last swapchain that existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceTracker {
    size: (u32, u32),
    pending: bool,
    formats: Option<(vk::Format, vk::Format)>,
}

impl SurfaceTracker {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            size,
            pending: false,
            formats: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn resized(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.pending = true;
    }

    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    /// Decide before acquiring. Recreation stays pending until `rebuilt`.
    pub fn before_acquire(&mut self, has_swapchain: bool) -> SwapchainAction {
        if !self.pending && has_swapchain {
            return SwapchainAction::Keep;
        }

        self.pending = true;
        if self.size.0 == 0 || self.size.1 == 0 {
            SwapchainAction::Skip
        } else {
            SwapchainAction::Recreate
        }
    }

    /// Record a new swapchain's (color, depth) formats. Returns true when
    /// they differ from the previous swapchain's, so pipelines need rebuilding.
    pub fn rebuilt(&mut self, formats: (vk::Format, vk::Format)) -> bool {
        self.pending = false;
        let changed = self.formats.is_some_and(|last| last != formats);
        self.formats = Some(formats);
        changed
    }
}

/// GPU-side view of one mesh for recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Objects that will be drawn this frame, in dynamic-slot order
#[derive(Debug, Default)]
pub struct DrawPlan {
    pub draws: Vec<MeshDraw>,
    pub objects: Vec<ObjectUbo>,
    /// Objects whose mesh handle no longer resolves
    pub missing: usize,
    /// Objects past the dynamic buffer's capacity
    pub dropped: usize,
}

impl DrawPlan {
    /// Assign each drawable object the next dynamic slot, up to `capacity`.
    pub fn build(
        objects: &[RenderObject],
        capacity: usize,
        resolve: impl Fn(MeshHandle) -> Option<MeshDraw>,
    ) -> Self {
        let mut plan = DrawPlan::default();

        for object in objects {
            let Some(draw) = resolve(object.mesh) else {
                plan.missing += 1;
                continue;
            };
            if plan.draws.len() == capacity {
                plan.dropped += 1;
                continue;
            }
            plan.draws.push(draw);
            plan.objects.push(ObjectUbo::from_object(object));
        }
        plan
    }
}

/// Raw buffers for a registered mesh; None if either buffer is gone
pub fn resolve_mesh(
    mesh: Option<&Mesh>,
    buffer: impl Fn(BufferHandle) -> Option<vk::Buffer>,
) -> Option<MeshDraw> {
    let mesh = mesh?;
    Some(MeshDraw {
        vertex_buffer: buffer(mesh.vertex_buffer)?,
        index_buffer: buffer(mesh.index_buffer)?,
        index_count: mesh.index_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::{BufferEntry, BufferHandle, BufferKind};
    use crate::backend::handle::NamedArena;
    use glam::{Mat4, Vec4};

    fn mesh(
        buffers: &mut NamedArena<BufferHandle, BufferEntry>,
        name: &str,
        index_count: u32,
    ) -> Mesh {
        let entry = BufferEntry {
            kind: BufferKind::Vertex,
            buffers: Vec::new(),
            count: 0,
        };
        let (handle, _) = buffers.insert(name, entry);
        Mesh {
            vertex_buffer: handle,
            index_buffer: handle,
            index_count,
        }
    }

    fn full_frame(mut phase: FramePhase) -> FramePhase {
        for event in [
            FrameEvent::Begin,
            FrameEvent::Acquired,
            FrameEvent::Submitted,
            FrameEvent::Present,
            FrameEvent::Presented,
        ] {
            phase = phase.on(event).unwrap();
        }
        phase
    }

    #[test]
    fn frame_cycles_back_to_idle() {
        assert_eq!(full_frame(FramePhase::Idle), FramePhase::Idle);
    }

    #[test]
    fn out_of_date_retries_acquire_without_submitting() {
        let phase = FramePhase::Idle.on(FrameEvent::Begin).unwrap();
        let phase = phase.on(FrameEvent::OutOfDate).unwrap();
        assert_eq!(phase, FramePhase::Acquiring);

        // The retried frame proceeds normally against the new swapchain
        let phase = phase.on(FrameEvent::Acquired).unwrap();
        assert_eq!(phase, FramePhase::Recording);
    }

    #[test]
    fn cannot_skip_phases() {
        assert_eq!(FramePhase::Idle.on(FrameEvent::Submitted), None);
        assert_eq!(FramePhase::Recording.on(FrameEvent::Present), None);
        assert_eq!(FramePhase::Acquiring.on(FrameEvent::Presented), None);
    }

    #[test]
    fn submitted_work_cannot_be_abandoned() {
        assert_eq!(FramePhase::Acquiring.on(FrameEvent::Abandon), Some(FramePhase::Idle));
        assert_eq!(FramePhase::Recording.on(FrameEvent::Abandon), Some(FramePhase::Idle));
        assert_eq!(FramePhase::Submitted.on(FrameEvent::Abandon), None);
        assert_eq!(FramePhase::Presenting.on(FrameEvent::Abandon), None);
    }

    fn mesh_draw(index_count: u32) -> MeshDraw {
        MeshDraw {
            vertex_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
            index_count,
        }
    }

    fn object(mesh: MeshHandle, i: usize) -> RenderObject {
        RenderObject {
            mesh,
            transform: Mat4::from_translation(glam::Vec3::new(i as f32, 0.0, 0.0)),
            color: Vec4::ONE,
        }
    }

    #[test]
    fn objects_past_capacity_are_dropped() {
        let mut buffers = NamedArena::new();
        let mut meshes: NamedArena<MeshHandle, Mesh> = NamedArena::new();
        let (cube, _) = meshes.insert("cube", mesh(&mut buffers, "cube_vbo", 36));
        let objects: Vec<_> = (0..101).map(|i| object(cube, i)).collect();

        let plan = DrawPlan::build(&objects, 100, |h| {
            meshes.get(h).map(|m| mesh_draw(m.index_count))
        });

        assert_eq!(plan.draws.len(), 100);
        assert_eq!(plan.objects.len(), 100);
        assert_eq!(plan.dropped, 1);
        assert_eq!(plan.missing, 0);
        // Slots are assigned in submission order
        assert_eq!(plan.objects[99].model, objects[99].transform);
    }

    #[test]
    fn unknown_meshes_are_skipped_without_using_a_slot() {
        let mut buffers = NamedArena::new();
        let mut meshes: NamedArena<MeshHandle, Mesh> = NamedArena::new();
        let (cube, _) = meshes.insert("cube", mesh(&mut buffers, "cube_vbo", 36));
        let (gone, _) = meshes.insert("gone", mesh(&mut buffers, "gone_vbo", 6));
        meshes.remove("gone");

        let objects = vec![object(gone, 0), object(cube, 1), object(cube, 2)];
        let plan = DrawPlan::build(&objects, 2, |h| {
            meshes.get(h).map(|m| mesh_draw(m.index_count))
        });

        assert_eq!(plan.missing, 1);
        assert_eq!(plan.dropped, 0);
        assert_eq!(plan.draws, vec![mesh_draw(36), mesh_draw(36)]);
        assert_eq!(plan.objects[0].model, objects[1].transform);
    }

    #[test]
    fn mesh_with_destroyed_buffer_does_not_resolve() {
        let mut buffers: NamedArena<BufferHandle, BufferEntry> = NamedArena::new();
        let cube = mesh(&mut buffers, "cube_vbo", 36);
        let raw = |h| buffers.get(h).map(|_| vk::Buffer::null());
        assert_eq!(resolve_mesh(Some(&cube), raw), Some(mesh_draw(36)));

        buffers.remove("cube_vbo");
        let raw = |h| buffers.get(h).map(|_| vk::Buffer::null());
        assert_eq!(resolve_mesh(Some(&cube), raw), None);
        assert_eq!(resolve_mesh(None, raw), None);
    }

    #[test]
    fn empty_frame_plans_nothing() {
        let plan = DrawPlan::build(&[], 10, |_| None);
        assert!(plan.draws.is_empty());
        assert_eq!(plan.missing + plan.dropped, 0);
    }

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn resize_recreates_before_the_next_acquire() {
        let mut surface = SurfaceTracker::new((800, 600));
        surface.rebuilt((COLOR, DEPTH));
        assert_eq!(surface.before_acquire(true), SwapchainAction::Keep);

        surface.resized(1024, 768);
        assert_eq!(surface.before_acquire(true), SwapchainAction::Recreate);
        assert!(!surface.rebuilt((COLOR, DEPTH)));
        assert_eq!(surface.before_acquire(true), SwapchainAction::Keep);
        assert_eq!(surface.size(), (1024, 768));
    }

    #[test]
    fn minimized_surface_skips_and_keeps_recreation_pending() {
        let mut surface = SurfaceTracker::new((800, 600));
        surface.rebuilt((COLOR, DEPTH));

        surface.resized(0, 0);
        for _ in 0..3 {
            assert_eq!(surface.before_acquire(true), SwapchainAction::Skip);
            assert!(surface.is_pending());
        }

        // Restored: rebuilt at the new size on the next frame
        surface.resized(640, 480);
        assert_eq!(surface.before_acquire(true), SwapchainAction::Recreate);
    }

    #[test]
    fn missing_swapchain_is_recreated_even_without_a_resize() {
        let mut surface = SurfaceTracker::new((800, 600));
        assert_eq!(surface.before_acquire(false), SwapchainAction::Recreate);

        let mut minimized = SurfaceTracker::new((0, 600));
        assert_eq!(minimized.before_acquire(false), SwapchainAction::Skip);
    }

    #[test]
    fn format_change_is_seen_across_a_minimized_gap() {
        let mut surface = SurfaceTracker::new((800, 600));
        assert!(!surface.rebuilt((COLOR, DEPTH)));

        // Minimized: no swapchain exists for a while
        surface.resized(0, 0);
        assert_eq!(surface.before_acquire(false), SwapchainAction::Skip);

        surface.resized(800, 600);
        assert_eq!(surface.before_acquire(false), SwapchainAction::Recreate);
        assert!(!surface.rebuilt((COLOR, DEPTH)));

        assert!(surface.rebuilt((vk::Format::R8G8B8A8_SRGB, DEPTH)));
        assert!(surface.rebuilt((vk::Format::R8G8B8A8_SRGB, vk::Format::D24_UNORM_S8_UINT)));
    }

    #[test]
    fn out_of_date_retries_until_the_limit() {
        assert_eq!(after_out_of_date(1, 3), AcquireRetry::Retry);
        assert_eq!(after_out_of_date(2, 3), AcquireRetry::Retry);
        assert_eq!(after_out_of_date(3, 3), AcquireRetry::Abandon);
        assert_eq!(after_out_of_date(1, 1), AcquireRetry::Abandon);
    }

    /// Drive the acquire loop over a scripted sequence of acquire results;
    /// returns (recreations, acquired).
    fn run_acquire(results: &[bool], max_attempts: usize) -> (usize, bool) {
        let mut phase = FramePhase::Idle.on(FrameEvent::Begin).unwrap();
        let mut attempts = 0;
        let mut recreations = 0;

        for &acquired in results {
            if acquired {
                phase = phase.on(FrameEvent::Acquired).unwrap();
                assert_eq!(phase, FramePhase::Recording);
                return (recreations, true);
            }
            phase = phase.on(FrameEvent::OutOfDate).unwrap();
            attempts += 1;
            match after_out_of_date(attempts, max_attempts) {
                AcquireRetry::Retry => recreations += 1,
                AcquireRetry::Abandon => {
                    phase = phase.on(FrameEvent::Abandon).unwrap();
                    assert_eq!(phase, FramePhase::Idle);
                    return (recreations, false);
                }
            }
        }
        (recreations, false)
    }

    #[test]
    fn acquire_recovers_after_two_out_of_date_results() {
        assert_eq!(run_acquire(&[false, false, true], 3), (2, true));
    }

    #[test]
    fn acquire_gives_up_after_three_out_of_date_results() {
        // The fourth result is never requested
        assert_eq!(run_acquire(&[false, false, false, true], 3), (2, false));
    }
}
