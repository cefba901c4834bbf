// Physical device selection
//
// Enumerates GPUs, rejects the ones that can't drive our renderer and scores
// the rest: discrete beats integrated, then more device-local memory wins.

use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;

use crate::error::{RenderError, RenderResult};

/// Surface the selected device must be able to present to.
#[derive(Clone, Copy)]
pub struct SurfaceTarget<'a> {
    pub loader: &'a khr::Surface,
    pub surface: vk::SurfaceKHR,
}

/// Immutable record of the GPU picked at startup.
#[derive(Clone)]
pub struct PhysicalDeviceChoice {
    pub physical_device: vk::PhysicalDevice,
    pub graphics_family: u32,
    pub present_family: u32,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl PhysicalDeviceChoice {
    pub fn device_name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Queue families that need their own `VkDeviceQueueCreateInfo`
    pub fn unique_queue_families(&self) -> Vec<u32> {
        unique_queue_families(self.graphics_family, self.present_family)
    }

    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

impl std::fmt::Debug for PhysicalDeviceChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceChoice")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("graphics_family", &self.graphics_family)
            .field("present_family", &self.present_family)
            .field("surface_formats", &self.surface_formats.len())
            .field("present_modes", &self.present_modes)
            .finish()
    }
}

/// Ordering key for suitable devices. Field order is the comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceScore {
    pub type_rank: u32,
    pub device_local_memory: u64,
}

pub fn score_device(
    device_type: vk::PhysicalDeviceType,
    memory: &vk::PhysicalDeviceMemoryProperties,
) -> DeviceScore {
    let type_rank = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    };

    DeviceScore {
        type_rank,
        device_local_memory: device_local_memory(memory),
    }
}

pub fn device_local_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Graphics and present may share a family; only create one queue for it.
pub fn unique_queue_families(graphics: u32, present: u32) -> Vec<u32> {
    if graphics == present {
        vec![graphics]
    } else {
        vec![graphics, present]
    }
}

/// Names from `required` that do not appear in `available`.
pub fn missing_extensions(available: &[&CStr], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Pick the graphics family and a present family, preferring one that does both.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<(u32, u32)> {
    let graphics: Vec<u32> = families
        .iter()
        .enumerate()
        .filter(|(_, props)| {
            props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(i, _)| i as u32)
        .collect();

    if let Some(&shared) = graphics.iter().find(|&&i| supports_present(i)) {
        return Some((shared, shared));
    }

    let graphics = *graphics.first()?;
    let present = (0..families.len() as u32).find(|&i| supports_present(i))?;
    Some((graphics, present))
}

pub fn required_device_extensions(with_surface: bool) -> Vec<&'static CStr> {
    if with_surface {
        vec![khr::Swapchain::name()]
    } else {
        Vec::new()
    }
}

pub struct DeviceSelector;

impl DeviceSelector {
    /// Select the best GPU for rendering to `surface` (or headless when `None`).
    ///
    /// Failure is fatal to startup and not retried.
    pub fn select(
        instance: &ash::Instance,
        surface: Option<SurfaceTarget<'_>>,
    ) -> RenderResult<PhysicalDeviceChoice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            log::error!("No Vulkan-capable GPU found");
            return Err(RenderError::NoSuitableDevice);
        }

        let mut best: Option<(DeviceScore, PhysicalDeviceChoice)> = None;
        let mut missing: Option<RenderError> = None;

        for device in devices {
            let candidate = match Self::evaluate(instance, device, surface) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e @ RenderError::MissingExtensions(_)) => {
                    missing = Some(e);
                    continue;
                }
                Err(e) => {
                    log::warn!("Skipping GPU after query failure: {}", e);
                    continue;
                }
            };

            let score = score_device(candidate.properties.device_type, &candidate.memory_properties);
            log::debug!("Candidate GPU {} scored {:?}", candidate.device_name(), score);

            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, candidate));
            }
        }

        // Only report missing extensions when nothing else was usable
        let (_, choice) = best.ok_or_else(|| missing.unwrap_or(RenderError::NoSuitableDevice))?;
        log::info!("Selected GPU: {:?}", choice);
        Ok(choice)
    }

    fn evaluate(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface: Option<SurfaceTarget<'_>>,
    ) -> RenderResult<Option<PhysicalDeviceChoice>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        let missing = missing_extensions(&available, &required_device_extensions(surface.is_some()));
        if !missing.is_empty() {
            log::debug!("{} lacks extensions: {}", name, missing.join(", "));
            return Err(RenderError::MissingExtensions(missing));
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queue_pair = match surface {
            Some(target) => pick_queue_families(&families, |index| unsafe {
                target
                    .loader
                    .get_physical_device_surface_support(device, index, target.surface)
                    .unwrap_or(false)
            }),
            None => pick_queue_families(&families, |_| true),
        };
        let Some((graphics_family, present_family)) = queue_pair else {
            log::debug!("{} has no graphics/present queue pair", name);
            return Ok(None);
        };

        let (surface_formats, present_modes) = match surface {
            Some(target) => unsafe {
                (
                    target
                        .loader
                        .get_physical_device_surface_formats(device, target.surface)?,
                    target
                        .loader
                        .get_physical_device_surface_present_modes(device, target.surface)?,
                )
            },
            None => (Vec::new(), Vec::new()),
        };
        if surface.is_some() && (surface_formats.is_empty() || present_modes.is_empty()) {
            log::debug!("{} has no usable surface format or present mode", name);
            return Ok(None);
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Some(PhysicalDeviceChoice {
            physical_device: device,
            graphics_family,
            present_family,
            surface_formats,
            present_modes,
            properties,
            memory_properties,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with_heaps(heaps: &[(u64, vk::MemoryHeapFlags)]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        for (i, &(size, flags)) in heaps.iter().enumerate() {
            memory.memory_heaps[i] = vk::MemoryHeap { size, flags };
        }
        memory.memory_heap_count = heaps.len() as u32;
        memory
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_beats_integrated_regardless_of_memory() {
        let small = memory_with_heaps(&[(1 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL)]);
        let large = memory_with_heaps(&[(16 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL)]);

        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &small);
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &large);
        assert!(discrete > integrated);
    }

    #[test]
    fn memory_breaks_ties_within_a_type() {
        let small = memory_with_heaps(&[(2 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL)]);
        let large = memory_with_heaps(&[(8 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL)]);

        assert!(
            score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &large)
                > score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &small)
        );
    }

    #[test]
    fn only_device_local_heaps_count() {
        let memory = memory_with_heaps(&[
            (4 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL),
            (32 << 30, vk::MemoryHeapFlags::empty()),
            (1 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL),
        ]);
        assert_eq!(device_local_memory(&memory), 5 << 30);
    }

    #[test]
    fn shared_family_creates_one_queue() {
        assert_eq!(unique_queue_families(0, 0), vec![0]);
        assert_eq!(unique_queue_families(0, 2), vec![0, 2]);
    }

    #[test]
    fn prefers_family_that_presents_and_draws() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        // family 2 can present, family 0 can't
        let pair = pick_queue_families(&families, |i| i == 2 || i == 1);
        assert_eq!(pair, Some((2, 2)));
    }

    #[test]
    fn falls_back_to_split_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let pair = pick_queue_families(&families, |i| i == 1);
        assert_eq!(pair, Some((0, 1)));
    }

    #[test]
    fn rejects_incomplete_queue_pairs() {
        let no_graphics = [family(vk::QueueFlags::COMPUTE)];
        assert_eq!(pick_queue_families(&no_graphics, |_| true), None);

        let no_present = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(pick_queue_families(&no_present, |_| false), None);
    }

    #[test]
    fn reports_missing_swapchain_extension() {
        let available = [c"VK_KHR_maintenance1"];
        let required = required_device_extensions(true);
        assert_eq!(missing_extensions(&available, &required), vec!["VK_KHR_swapchain"]);

        let available = [c"VK_KHR_swapchain", c"VK_KHR_maintenance1"];
        assert!(missing_extensions(&available, &required).is_empty());
    }

    #[test]
    fn headless_needs_no_extensions() {
        assert!(required_device_extensions(false).is_empty());
    }
}
