// Swapchain - Window presentation
//
// Owns everything whose size or count follows the surface: the swapchain
// images and views, one depth image per swapchain image, the render pass
// and one framebuffer per image. Recreation builds a new Swapchain from the
// old one and drops the old one afterwards.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::image::Image;
use super::VulkanDevice;

/// Default number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Color and depth formats; pipelines built against one render pass stay
/// compatible with a recreated one as long as these match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    depth_images: Vec<Image>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    formats: SwapchainFormats,
    extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create a swapchain for the device's surface.
    ///
    /// When `old` is given its handle is passed as `oldSwapchain` so the
    /// driver can hand over resources; the caller drops `old` afterwards.
    pub fn new(
        device: Arc<VulkanDevice>,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = device.surface_support()?;
        let capabilities = support.capabilities;

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = choose_image_count(&capabilities);

        anyhow::ensure!(
            extent.width > 0 && extent.height > 0,
            "Cannot create a swapchain with a zero-sized extent"
        );

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let queue_families = device.queue_families.unique();
        let family_indices: &[u32] = if queue_families.len() > 1 {
            &queue_families
        } else {
            &[]
        };
        let sharing_mode = if family_indices.is_empty() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let depth_format = device.find_depth_format()?;

        // Partially built; Drop destroys whatever exists if a later step fails
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_images: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            formats: SwapchainFormats {
                color: surface_format.format,
                depth: depth_format,
            },
            extent,
            present_mode,
            device,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;
        this.create_image_views()?;
        this.create_depth_resources()?;
        this.create_render_pass()?;
        this.create_framebuffers()?;

        log::info!("Created swapchain with {} images", this.images.len());

        Ok(this)
    }

    fn create_image_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.formats.color)
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

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .context("Failed to create swapchain image view")?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_depth_resources(&mut self) -> Result<()> {
        for _ in 0..self.images.len() {
            let depth = Image::depth(self.device.clone(), self.extent, self.formats.depth)?;
            self.depth_images.push(depth);
        }
        Ok(())
    }

    fn create_render_pass(&mut self) -> Result<()> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(self.formats.color)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(self.formats.depth)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
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

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
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

        self.render_pass = unsafe { self.device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;
        Ok(())
    }

    fn create_framebuffers(&mut self) -> Result<()> {
        for (view, depth) in self.image_views.iter().zip(&self.depth_images) {
            let attachments = [*view, depth.view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer =
                unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                    .context("Failed to create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Ask for the next presentable image.
    ///
    /// The raw result is returned so the frame state machine can tell
    /// `ERROR_OUT_OF_DATE_KHR` apart from real failures.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VkResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    pub fn formats(&self) -> SwapchainFormats {
        self.formats
    }

    pub fn compare_formats(&self, other: &Swapchain) -> bool {
        self.formats == other.formats
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).copied()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
        self.depth_images.clear();
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise take whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .context("No suitable surface format")
}

/// Use `preferred` when the surface offers it. FIFO is always supported.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window size clamped to the surface
/// limits when the surface leaves it to us (`u32::MAX`).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, bounded by the maximum (0 = unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallback_and_empty() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_choose_present_mode_honours_preference() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = caps((1920, 1080), (1, 1), (4096, 4096));
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_window_size() {
        let capabilities = caps((u32::MAX, u32::MAX), (100, 100), (1000, 1000));
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 5000,
                height: 50,
            },
        );
        assert_eq!((extent.width, extent.height), (1000, 100));
    }

    #[test]
    fn test_choose_image_count() {
        let mut capabilities = caps((800, 600), (1, 1), (800, 600));
        capabilities.min_image_count = 2;
        capabilities.max_image_count = 0;
        assert_eq!(choose_image_count(&capabilities), 3);

        capabilities.max_image_count = 2;
        assert_eq!(choose_image_count(&capabilities), 2);
    }

    #[test]
    fn test_formats_equality_drives_compatibility() {
        let a = SwapchainFormats {
            color: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D32_SFLOAT,
        };
        let mut b = a;
        assert_eq!(a, b);
        b.depth = vk::Format::D24_UNORM_S8_UINT;
        assert_ne!(a, b);
    }
}
