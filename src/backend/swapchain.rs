// Swapchain - Window presentation
//
// Owns the chain of images we render to and present to the screen, the
// depth buffer shared by every framebuffer, the render pass, and one
// framebuffer per image. All of it is rebuilt when the surface changes size.

use ash::extensions::khr;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::RenderDeviceContext;
use crate::error::{RenderError, RenderResult};

/// Depth formats tried in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

// -----------------------------------------------------------------------------
// Negotiation
// -----------------------------------------------------------------------------

/// Prefer 8-bit BGRA sRGB, otherwise take whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Use the configured mode if available, then MAILBOX, then FIFO.
/// FIFO is always supported and caps the frame rate to vsync.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Clamp the requested window size to what the surface allows.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum (so we never wait on the driver), within the max.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}

/// First candidate whose optimal tiling supports depth-stencil attachments.
pub fn find_depth_format(
    candidates: &[vk::Format],
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

// -----------------------------------------------------------------------------
// Depth buffer
// -----------------------------------------------------------------------------

/// Depth attachment shared by every framebuffer of one swapchain
pub struct DepthBuffer {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    allocation: Option<Allocation>,
}

impl DepthBuffer {
    fn new(
        context: &RenderDeviceContext,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let device = &context.device;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = context.allocator().lock().allocate(&AllocationCreateDesc {
            name: "depth_buffer",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            let _ = context.allocator().lock().free(allocation);
            unsafe { device.destroy_image(image, None) };
            return Err(e.into());
        }

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil(format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                let _ = context.allocator().lock().free(allocation);
                unsafe { device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            image,
            view,
            format,
            allocation: Some(allocation),
        })
    }

    fn destroy(&mut self, context: &RenderDeviceContext) {
        unsafe {
            context.device.destroy_image_view(self.view, None);
            context.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = context.allocator().lock().free(allocation) {
                log::error!("Failed to free depth buffer allocation: {}", e);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Render pass + framebuffers
// -----------------------------------------------------------------------------

/// Create a render pass with one color attachment (presented) and one depth attachment
pub fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> RenderResult<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    // Depth attachment
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    // The depth image is shared across frames in flight, so the previous
    // frame's depth writes must finish before this one clears it
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }?;
    Ok(render_pass)
}

/// Create framebuffers for each swapchain image (with depth attachment)
pub fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    depth_image_view: vk::ImageView,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RenderResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view, depth_image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(e.into());
            }
        }
    }

    Ok(framebuffers)
}

// -----------------------------------------------------------------------------
// Swapchain
// -----------------------------------------------------------------------------

/// Result of asking the presentation engine for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal: recreate before the next acquire
    NeedsRecreate,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub depth: DepthBuffer,
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    loader: khr::Swapchain,
    context: Arc<RenderDeviceContext>,
}

impl Swapchain {
    /// Build the image chain, depth buffer, render pass and framebuffers.
    ///
    /// Returns `Ok(None)` while the surface has zero area (minimized window).
    pub fn new(
        context: Arc<RenderDeviceContext>,
        loader: khr::Swapchain,
        preferred_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> RenderResult<Option<Self>> {
        let surface = context.surface().ok_or(RenderError::NoSurface)?;
        let physical_device = context.choice.physical_device;

        // Capabilities change with the window, formats and modes don't
        let caps = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
        }?;

        let extent = choose_extent(&caps, width, height);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has zero area, deferring swapchain creation");
            return Ok(None);
        }

        let surface_format = choose_surface_format(&context.choice.surface_formats)
            .ok_or(RenderError::NoSuitableDevice)?;
        let present_mode = choose_present_mode(&context.choice.present_modes, preferred_present_mode);
        let image_count = choose_image_count(&caps);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        // Graphics and present on different families need concurrent sharing
        let queue_families = context.choice.unique_queue_families();
        let sharing_mode = if queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }?;

        // From here on, partial state is cleaned up by Drop
        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            depth: DepthBuffer {
                image: vk::Image::null(),
                view: vk::ImageView::null(),
                format: vk::Format::UNDEFINED,
                allocation: None,
            },
            render_pass: vk::RenderPass::null(),
            format: surface_format.format,
            extent,
            present_mode,
            loader,
            context: context.clone(),
        };

        this.images = unsafe { this.loader.get_swapchain_images(swapchain) }?;
        log::info!("Created swapchain with {} images", this.images.len());

        for &image in &this.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { context.device.create_image_view(&view_info, None) }?;
            this.image_views.push(view);
        }

        let depth_format = find_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| unsafe {
            context
                .instance
                .get_physical_device_format_properties(physical_device, format)
        })
        .ok_or(RenderError::NoDepthFormat)?;
        this.depth = DepthBuffer::new(&context, depth_format, extent)?;

        this.render_pass = create_render_pass(&context.device, surface_format.format, depth_format)?;
        this.framebuffers = create_framebuffers(
            &context.device,
            &this.image_views,
            this.depth.view,
            this.render_pass,
            extent,
        )?;

        debug_assert_eq!(this.images.len(), this.image_views.len());
        debug_assert_eq!(this.images.len(), this.framebuffers.len());

        Ok(Some(this))
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth.format
    }

    /// Acquire next image for rendering, signalling `semaphore` when it's ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::NeedsRecreate),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
        }
        if self.depth.view != vk::ImageView::null() {
            self.depth.destroy(&self.context);
        }
        unsafe {
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

// -----------------------------------------------------------------------------
// Manager
// -----------------------------------------------------------------------------

/// Owns the current swapchain and rebuilds it on resize
pub struct SwapchainManager {
    context: Arc<RenderDeviceContext>,
    loader: khr::Swapchain,
    preferred_present_mode: vk::PresentModeKHR,
    current: Option<Swapchain>,
}

impl SwapchainManager {
    pub fn new(context: Arc<RenderDeviceContext>, preferred_present_mode: vk::PresentModeKHR) -> Self {
        let loader = khr::Swapchain::new(&context.instance, &context.device);
        Self {
            context,
            loader,
            preferred_present_mode,
            current: None,
        }
    }

    /// Build the swapchain for a `width`x`height` window.
    ///
    /// Returns `false` if the surface is currently zero-sized.
    pub fn create(&mut self, width: u32, height: u32) -> RenderResult<bool> {
        self.current = Swapchain::new(
            self.context.clone(),
            self.loader.clone(),
            self.preferred_present_mode,
            width,
            height,
        )?;
        Ok(self.current.is_some())
    }

    /// Tear down the old chain and build a new one.
    ///
    /// The caller must have waited for the device to go idle: in-flight
    /// command buffers reference the old framebuffers.
    pub fn recreate(&mut self, width: u32, height: u32) -> RenderResult<bool> {
        // The surface can only have one swapchain at a time
        self.current = None;
        self.create(width, height)
    }

    pub fn current(&self) -> Option<&Swapchain> {
        self.current.as_ref()
    }

    pub fn destroy(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox_then_fifo() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&all, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&all, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );

        let no_preferred = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&no_preferred, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn window_size_within_bounds_is_kept() {
        let extent = choose_extent(&caps(2, 3), 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn window_size_is_clamped() {
        let mut caps = caps(2, 3);
        caps.min_image_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };

        let extent = choose_extent(&caps, 100, 5000);
        assert_eq!((extent.width, extent.height), (640, 1080));
    }

    #[test]
    fn defined_current_extent_wins() {
        let mut caps = caps(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn image_count_stays_within_surface_limits() {
        for (min, max) in [(1, 0), (2, 2), (2, 3), (3, 8), (1, 1)] {
            let n = choose_image_count(&caps(min, max));
            assert!(n >= min, "{} < min {}", n, min);
            if max > 0 {
                assert!(n <= max, "{} > max {}", n, max);
            }
        }
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
    }

    #[test]
    fn depth_format_is_first_supported_candidate() {
        let supported = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            },
            ..Default::default()
        };
        assert_eq!(
            find_depth_format(&DEPTH_FORMAT_CANDIDATES, supported),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );

        let nothing = |_: vk::Format| vk::FormatProperties::default();
        assert_eq!(find_depth_format(&DEPTH_FORMAT_CANDIDATES, nothing), None);
    }

    #[test]
    fn linear_tiling_support_is_not_enough() {
        let linear_only = |_: vk::Format| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(find_depth_format(&DEPTH_FORMAT_CANDIDATES, linear_only), None);
    }

    #[test]
    fn stencil_aspect_only_for_stencil_formats() {
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
    }
}
