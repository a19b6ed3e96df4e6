// Backend module - Vulkan abstraction layer
//
// Thin owning wrappers around ash handles. Every wrapper holds an
// Arc<VulkanDevice> so the device outlives everything created from it.

pub mod buffer;
pub mod descriptors;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
