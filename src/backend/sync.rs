// Frame slots
//
// Each frame in flight owns a command buffer, an image-available and a
// render-finished semaphore, and a fence that is signalled once the GPU is
// done with the slot. Slots are used round-robin; a slot is only reused after
// waiting on its own fence.

use ash::vk;
use std::sync::Arc;

use super::command::CommandSubmitter;
use super::RenderDeviceContext;
use crate::error::RenderResult;

fn create_fence(device: &ash::Device) -> RenderResult<vk::Fence> {
    // Start signaled so the first wait on a fresh slot returns immediately
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
    Ok(unsafe { device.create_fence(&fence_info, None) }?)
}

fn create_semaphore(device: &ash::Device) -> RenderResult<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    Ok(unsafe { device.create_semaphore(&semaphore_info, None) }?)
}

/// Resources owned by one frame in flight
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSlot {
    pub fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> RenderResult<Self> {
        let image_available = create_semaphore(device)?;
        let render_finished = match create_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(err) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(err);
            }
        };
        let in_flight_fence = match create_fence(device) {
            Ok(fence) => fence,
            Err(err) => {
                unsafe {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                }
                return Err(err);
            }
        };

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Block until the GPU has finished this slot's last submission.
    pub fn wait(&self, device: &ash::Device) -> RenderResult<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }?;
        Ok(())
    }

    /// Re-arm the fence; only once work is certain to be submitted this frame.
    pub fn reset(&self, device: &ash::Device) -> RenderResult<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }

    pub fn is_signalled(&self, device: &ash::Device) -> RenderResult<bool> {
        Ok(unsafe { device.get_fence_status(self.in_flight_fence) }?)
    }

    /// Replace the fence (signalled) and the image-available semaphore.
    ///
    /// Last resort when neither can be returned to a known state by a
    /// submission. Waits for the device first so neither object is in use.
    pub fn rebuild_sync(&mut self, device: &ash::Device) -> RenderResult<()> {
        unsafe { device.device_wait_idle() }?;

        let fence = create_fence(device)?;
        let semaphore = match create_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(err) => {
                unsafe { device.destroy_fence(fence, None) };
                return Err(err);
            }
        };

        unsafe {
            device.destroy_fence(self.in_flight_fence, None);
            device.destroy_semaphore(self.image_available, None);
        }
        self.in_flight_fence = fence;
        self.image_available = semaphore;
        Ok(())
    }

    /// Command buffers are owned by the pool and freed with it
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Round-robin position over `len` slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCycle {
    current: usize,
    len: usize,
}

impl SlotCycle {
    pub fn new(slots: usize) -> Self {
        Self {
            current: 0,
            len: slots.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.len;
    }
}

/// Ring of frame slots cycled once per frame
pub struct FrameSlots {
    context: Arc<RenderDeviceContext>,
    slots: Vec<FrameSlot>,
    cycle: SlotCycle,
}

impl FrameSlots {
    pub fn new(context: Arc<RenderDeviceContext>, command_buffers: Vec<vk::CommandBuffer>) -> RenderResult<Self> {
        let mut slots = Vec::with_capacity(command_buffers.len());
        for command_buffer in command_buffers {
            match FrameSlot::new(&context.device, command_buffer) {
                Ok(slot) => slots.push(slot),
                Err(err) => {
                    for slot in &slots {
                        slot.destroy(&context.device);
                    }
                    return Err(err);
                }
            }
        }

        let cycle = SlotCycle::new(slots.len());
        log::debug!("Created {} frame slot(s)", slots.len());
        Ok(Self {
            context,
            slots,
            cycle,
        })
    }

    pub fn index(&self) -> usize {
        self.cycle.current()
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.cycle.current()]
    }

    pub fn advance(&mut self) {
        self.cycle.advance();
    }

    /// Put the current slot back in a reusable state after its frame failed
    /// between acquire and submit.
    ///
    /// An empty batch waits on the image-available semaphore and signals the
    /// fence, so the next wait on this slot returns and the semaphore is
    /// unsignalled again. If that submission fails, both objects are rebuilt.
    pub fn release_current(&mut self, commands: &CommandSubmitter) {
        let index = self.cycle.current();
        let device = &self.context.device;

        let slot = &self.slots[index];
        let released = slot
            .reset(device)
            .and_then(|()| commands.submit_signal_only(Some(slot.image_available), slot.in_flight_fence));

        if let Err(err) = released {
            log::warn!("Could not release frame slot {}: {}; rebuilding its sync objects", index, err);
            if let Err(err) = self.slots[index].rebuild_sync(device) {
                log::error!("Frame slot {} sync rebuild failed: {}", index, err);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.destroy(&self.context.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_slots_rotate_in_order() {
        let mut cycle = SlotCycle::new(3);
        let mut used = Vec::new();

        for _ in 0..5 {
            used.push(cycle.current());
            cycle.advance();
        }

        assert_eq!(used, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn single_slot_serializes_every_frame() {
        let mut cycle = SlotCycle::new(1);
        for _ in 0..3 {
            assert_eq!(cycle.current(), 0);
            cycle.advance();
        }
        assert_eq!(cycle.len(), 1);
    }

    #[test]
    fn zero_slots_is_clamped_to_one() {
        let cycle = SlotCycle::new(0);
        assert_eq!(cycle.len(), 1);
        assert!(!cycle.is_empty());
    }
}
