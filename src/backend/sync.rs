// Synchronization primitives
//
// One set per frame in flight:
// - image_available: acquire -> submit (GPU-GPU)
// - render_finished: submit -> present (GPU-GPU)
// - in_flight: submit -> CPU, guards reuse of the slot's command buffer

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on a fresh slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let raw = &device.device;
        unsafe {
            let image_available = raw
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            let render_finished = match raw.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    raw.destroy_semaphore(image_available, None);
                    return Err(e).context("Failed to create render-finished semaphore");
                }
            };
            let in_flight_fence = match raw.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    raw.destroy_semaphore(image_available, None);
                    raw.destroy_semaphore(render_finished, None);
                    return Err(e).context("Failed to create in-flight fence");
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
                device: device.clone(),
            })
        }
    }

    /// Create `count` independent sets.
    pub fn create_many(device: &Arc<VulkanDevice>, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::new(device)).collect()
    }

    /// Block until the GPU has finished the last submission that used this slot.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }
        .context("Failed waiting for in-flight fence")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
