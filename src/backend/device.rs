// Render device context - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation from the window's raw handles
// - Physical device selection (delegated to DeviceSelector)
// - Logical device + graphics/present queue creation
// - Memory allocator setup
//
// One context is created at startup and shared by Arc with every manager,
// so it outlives all of them.

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::selector::{DeviceSelector, PhysicalDeviceChoice, SurfaceTarget};
use crate::error::RenderResult;

/// Window the context presents to
#[derive(Clone, Copy)]
pub struct WindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

/// Vulkan device wrapper with automatic cleanup
pub struct RenderDeviceContext {
    // Vulkan handles (destroyed explicitly in Drop, allocator first)
    allocator: ManuallyDrop<Mutex<gpu_allocator::vulkan::Allocator>>,
    pub device: ash::Device,
    pub choice: PhysicalDeviceChoice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Presentation target (None for headless contexts)
    pub surface_loader: khr::Surface,
    surface: Option<vk::SurfaceKHR>,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl RenderDeviceContext {
    /// Create a context that presents to `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `window` - Raw handles of the window to render into
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        window: WindowHandles,
    ) -> RenderResult<Arc<Self>> {
        Self::create(app_name, enable_validation, Some(window))
    }

    /// Create a context without a surface: graphics queue only, no swapchain.
    pub fn headless(app_name: &str, enable_validation: bool) -> RenderResult<Arc<Self>> {
        Self::create(app_name, enable_validation, None)
    }

    fn create(
        app_name: &str,
        enable_validation: bool,
        window: Option<WindowHandles>,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }?;

        // Step 2: Create instance with the extensions the window system needs
        let instance = Self::create_instance(&entry, app_name, enable_validation, window)?;

        // From here on a failing step destroys what the earlier steps created

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        // Step 4: Create the surface before device selection (present support is per surface)
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = match window {
            Some(handles) => match unsafe {
                ash_window::create_surface(&entry, &instance, handles.display, handles.window, None)
            } {
                Ok(surface) => Some(surface),
                Err(err) => {
                    destroy_instance_objects(&instance, &surface_loader, None, debug_utils);
                    return Err(err.into());
                }
            },
            None => None,
        };

        // Steps 5-7: physical device, logical device, allocator
        let (choice, device, allocator) = match Self::open_device(&instance, &surface_loader, surface) {
            Ok(opened) => opened,
            Err(err) => {
                destroy_instance_objects(&instance, &surface_loader, surface, debug_utils);
                return Err(err);
            }
        };
        let graphics_queue = unsafe { device.get_device_queue(choice.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(choice.present_family, 0) };

        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(choice.properties.api_version),
            vk::api_version_minor(choice.properties.api_version),
            vk::api_version_patch(choice.properties.api_version)
        );

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            choice,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            surface_loader,
            surface,
            debug_utils,
        }))
    }

    fn open_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: Option<vk::SurfaceKHR>,
    ) -> RenderResult<(PhysicalDeviceChoice, ash::Device, gpu_allocator::vulkan::Allocator)> {
        // Pick physical device (GPU)
        let target = surface.map(|surface| SurfaceTarget {
            loader: surface_loader,
            surface,
        });
        let choice = DeviceSelector::select(instance, target)?;

        // Create logical device
        let device = Self::create_logical_device(instance, &choice, surface.is_some())?;

        // Create memory allocator
        match Self::create_allocator(instance, choice.physical_device, &device) {
            Ok(allocator) => Ok((choice, device, allocator)),
            Err(err) => {
                unsafe { device.destroy_device(None) };
                Err(err)
            }
        }
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        window: Option<WindowHandles>,
    ) -> RenderResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"frame-core";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const std::ffi::c_char> = match window {
            Some(handles) => ash_window::enumerate_required_extensions(handles.display)?.to_vec(),
            None => Vec::new(),
        };
        if enable_validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        // Validation layers
        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        choice: &PhysicalDeviceChoice,
        with_surface: bool,
    ) -> RenderResult<ash::Device> {
        // One queue per unique family; graphics and present may coincide
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = choice
            .unique_queue_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const std::ffi::c_char> =
            super::selector::required_device_extensions(with_surface)
                .iter()
                .map(|name| name.as_ptr())
                .collect();

        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(choice.physical_device, &create_info, None) }?;
        Ok(device)
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> RenderResult<gpu_allocator::vulkan::Allocator> {
        let allocator =
            gpu_allocator::vulkan::Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })?;

        Ok(allocator)
    }

    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface
    }

    pub fn allocator(&self) -> &Mutex<gpu_allocator::vulkan::Allocator> {
        &self.allocator
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.choice.memory_properties
    }

    /// Wait for device to be idle (e.g., before cleanup or swapchain recreation)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for RenderDeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order; the allocator frees its blocks through the device
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        destroy_instance_objects(
            &self.instance,
            &self.surface_loader,
            self.surface.take(),
            self.debug_utils.take(),
        );
    }
}

/// Destroy the surface, debug messenger and instance, in that order.
fn destroy_instance_objects(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: Option<vk::SurfaceKHR>,
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
) {
    unsafe {
        if let Some(surface) = surface {
            surface_loader.destroy_surface(surface, None);
        }

        if let Some((debug_utils, messenger)) = debug_utils {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }

        instance.destroy_instance(None);
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
