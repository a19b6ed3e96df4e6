// GPU device and window surface
//
// Owns everything that lives as long as the window does: instance, debug
// messenger, surface, the chosen physical device (discrete preferred, must
// be able to present), logical device with its graphics and present
// queues, one command pool, and the allocator all buffers and images use.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use winit::window::Window;

/// Required Vulkan device features for our renderer
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    sampler_anisotropy: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue families the renderer submits to. They may be the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct family indices, one queue create info per entry.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }
}

/// What the surface offers for swapchain creation, queried fresh each time
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Wrapped so it can be dropped before the device it allocates from
    allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    window: Arc<Window>,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,
    pub command_pool: vk::CommandPool,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create Vulkan device bound to `window`'s surface
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `window` - Window to present into; kept alive as long as the surface
    pub fn new(app_name: &str, enable_validation: bool, window: Arc<Window>) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let enable_validation = enable_validation && Self::validation_available(&entry);
        let instance = Self::create_instance(&entry, app_name, enable_validation, &window)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface_loader = khr::Surface::new(&entry, &instance);

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::debug!("Queue families: {:?}", queue_families);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_families.graphics)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU allocator")?;

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            window,
            graphics_queue,
            present_queue,
            queue_families,
            command_pool,
            debug_utils,
            properties,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default();
        let found = layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        });
        if !found {
            log::warn!("Validation layers requested but not available");
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        window: &Window,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Spectra")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Surface extensions for whatever platform the window lives on
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .context("Unsupported windowing platform")?
                .to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

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

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            if features.sampler_anisotropy != vk::TRUE {
                continue;
            }
            if !Self::supports_swapchain(instance, device) {
                continue;
            }
            let Some(families) =
                Self::find_queue_families(instance, surface_loader, surface, device)
            else {
                continue;
            };

            // A surface with no formats or present modes can't back a swapchain
            let formats = unsafe {
                surface_loader.get_physical_device_surface_formats(device, surface)
            }
            .unwrap_or_default();
            let present_modes = unsafe {
                surface_loader.get_physical_device_surface_present_modes(device, surface)
            }
            .unwrap_or_default();
            if formats.is_empty() || present_modes.is_empty() {
                continue;
            }

            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best_device = Some((device, families));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
        extensions.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == khr::Swapchain::name()
        })
    }

    fn find_queue_families(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Option<QueueFamilyIndices> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            let supports_present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }
            .unwrap_or(false);
            if present.is_none() && supports_present {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Some(QueueFamilyIndices {
            graphics: graphics?,
            present: present?,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Current drawable size of the window in pixels.
    pub fn window_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: self.surface_capabilities()?,
            formats: self.surface_formats()?,
            present_modes: self.surface_present_modes()?,
        })
    }

    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }?)
    }

    pub fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }?)
    }

    pub fn surface_present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }?)
    }

    /// First format in `candidates` whose tiling features include `features`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = unsafe {
                    self.instance
                        .get_physical_device_format_properties(self.physical_device, format)
                };
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                    _ => false,
                }
            })
            .context("No supported format among candidates")
    }

    pub fn find_depth_format(&self) -> Result<vk::Format> {
        self.find_supported_format(
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Sub-allocate memory for a buffer or image.
    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut guard = self.allocator.lock();
        let allocator = guard.as_mut().context("Allocator already destroyed")?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for {}", name))
    }

    pub fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free allocation: {}", e);
            }
        }
    }

    /// Record and submit a one-shot command buffer, blocking until the GPU
    /// has finished it.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-shot command buffer")?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }?;

            record(command_buffer);

            unsafe { self.device.end_command_buffer(command_buffer) }?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                self.device.queue_submit(
                    self.graphics_queue,
                    &[submit_info.build()],
                    vk::Fence::null(),
                )?;
                self.device.queue_wait_idle(self.graphics_queue)?;
            }
            Ok(())
        })();

        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &[command_buffer]);
        }

        result.context("One-shot submission failed")
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        self.immediate_submit(|cmd| unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            self.device.cmd_copy_buffer(cmd, src, dst, &[region]);
        })
    }

    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.immediate_submit(|cmd| unsafe {
            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                })
                .build();
            self.device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }

    /// Layout transitions used by texture uploads.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => anyhow::bail!(
                "Unsupported layout transition {:?} -> {:?}",
                old_layout,
                new_layout
            ),
        };

        self.immediate_submit(|cmd| unsafe {
            let barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .build();
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Reverse order of creation
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            drop(self.allocator.lock().take());
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
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
