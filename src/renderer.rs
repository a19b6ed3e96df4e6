// Renderer - drives the swapchain through one frame at a time
//
// FRAME TIMELINE (slot = current frame-in-flight):
//   wait slot fence -> acquire image -> wait fence that last used the image
//   -> record -> reset slot fence -> submit -> present -> advance slot
//
// The fence is only reset right before submit, so bailing out after an
// out-of-date acquire leaves it signaled and the next frame cannot deadlock.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::sync::FrameSync;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::frame::{AcquireOutcome, FrameCycle, FrameError, SwapchainStatus};

pub struct Renderer {
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    swapchain: Swapchain,
    cycle: FrameCycle,
    preferred_present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    status: SwapchainStatus,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(device: Arc<VulkanDevice>, config: &Config) -> Result<Self> {
        let preferred_present_mode = config.preferred_present_mode();
        let frames_in_flight = config.frames_in_flight();

        let swapchain = Swapchain::new(
            device.clone(),
            device.window_extent(),
            preferred_present_mode,
            None,
        )?;

        // One command buffer per frame in flight, reused every time the slot comes round
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate frame command buffers")?;

        let frame_sync = match FrameSync::create_many(&device, frames_in_flight) {
            Ok(sync) => sync,
            Err(e) => {
                unsafe {
                    device
                        .device
                        .free_command_buffers(device.command_pool, &command_buffers);
                }
                return Err(e);
            }
        };

        let cycle = FrameCycle::new(frames_in_flight, swapchain.image_count());
        log::info!(
            "Renderer ready: {} frames in flight, {} swapchain images",
            frames_in_flight,
            swapchain.image_count()
        );

        Ok(Self {
            command_buffers,
            frame_sync,
            swapchain,
            cycle,
            preferred_present_mode,
            clear_color: config.graphics.clear_color,
            status: SwapchainStatus::default(),
            device,
        })
    }

    /// Start a frame and return its command buffer, already in the
    /// recording state.
    ///
    /// `None` means no frame could be started this time (window minimized
    /// or swapchain just rebuilt); the caller should simply try again later.
    pub fn begin_frame(&mut self) -> Result<Option<vk::CommandBuffer>> {
        self.cycle.ensure_idle()?;

        if self.status.should_recreate() && !self.recreate_swapchain()? {
            return Ok(None);
        }

        let slot = self.cycle.current_slot();
        let (image_available, in_flight_fence) = {
            let sync = &self.frame_sync[slot];
            sync.wait()?;
            (sync.image_available, sync.in_flight_fence)
        };

        let acquired = AcquireOutcome::from_result(
            self.swapchain.acquire_next_image(image_available),
        )
        .context("Failed to acquire swapchain image")?;
        let Some(image_index) = self.status.on_acquire(acquired) else {
            // Nothing was submitted, so the slot fence is still signaled
            log::debug!("Swapchain out of date on acquire");
            self.recreate_swapchain()?;
            return Ok(None);
        };

        // Another slot may still be rendering into this image
        if let Some(previous) = self.cycle.claim_image(image_index, in_flight_fence)? {
            unsafe {
                self.device
                    .device
                    .wait_for_fences(&[previous], true, u64::MAX)
            }
            .context("Failed waiting for swapchain image fence")?;
        }

        self.cycle.begin(image_index)?;

        let command_buffer = self.command_buffers[slot];
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let recording = unsafe {
            self.device
                .device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .and_then(|_| {
                    self.device
                        .device
                        .begin_command_buffer(command_buffer, &begin_info)
                })
        };
        if let Err(e) = recording {
            self.cycle.abort();
            return Err(e).context("Failed to begin frame command buffer");
        }

        Ok(Some(command_buffer))
    }

    /// Submit and present the frame started by `begin_frame`.
    pub fn end_frame(&mut self) -> Result<()> {
        self.cycle.ensure_can_end()?;
        let slot = self.cycle.current_slot();
        let image_index = self.cycle.image_index()?;

        if let Err(e) = self.submit(slot) {
            self.recover_from_failed_submit();
            return Err(e);
        }

        let presented = self.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.frame_sync[slot].render_finished],
        );
        self.cycle.end()?;

        if self
            .status
            .on_present(presented)
            .context("Failed to present swapchain image")?
        {
            log::debug!("Swapchain stale after present");
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    /// The slot fence may have been reset without a submission that would
    /// ever signal it. Replace every sync object and forget which fences own
    /// which images, so no later frame waits on it.
    fn recover_from_failed_submit(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle after submit error: {:#}", e);
        }
        match FrameSync::create_many(&self.device, self.cycle.frames_in_flight()) {
            Ok(sync) => self.frame_sync = sync,
            Err(e) => log::error!("Failed to rebuild frame sync objects: {:#}", e),
        }
        self.cycle.abandon();
    }

    fn submit(&self, slot: usize) -> Result<()> {
        let command_buffer = self.command_buffers[slot];
        let sync = &self.frame_sync[slot];

        unsafe { self.device.device.end_command_buffer(command_buffer) }
            .context("Failed to record frame command buffer")?;

        sync.reset()?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit frame command buffer")
    }

    /// Begin the swapchain render pass and set a full-extent viewport.
    pub fn begin_render_pass(&mut self, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.check_command_buffer(command_buffer)?;
        let image_index = self.cycle.image_index()?;
        let framebuffer = self
            .swapchain
            .framebuffer(image_index)
            .context("No framebuffer for acquired image")?;

        self.cycle.begin_render_pass()?;

        let extent = self.swapchain.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            let raw = &self.device.device;
            raw.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            raw.cmd_set_viewport(command_buffer, 0, &[viewport]);
            raw.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
        Ok(())
    }

    pub fn end_render_pass(&mut self, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.check_command_buffer(command_buffer)?;
        self.cycle.end_render_pass()?;
        unsafe { self.device.device.cmd_end_render_pass(command_buffer) };
        Ok(())
    }

    fn check_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), FrameError> {
        let slot = self.cycle.frame_index()?;
        if self.command_buffers[slot] != command_buffer {
            return Err(FrameError::ForeignCommandBuffer);
        }
        Ok(())
    }

    /// Rebuild the swapchain for the current window size.
    ///
    /// Returns `false` without doing anything while the window has no area.
    pub fn recreate_swapchain(&mut self) -> Result<bool> {
        self.cycle.ensure_idle()?;

        let extent = self.device.window_extent();
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        self.device.wait_idle()?;

        let swapchain = Swapchain::new(
            self.device.clone(),
            extent,
            self.preferred_present_mode,
            Some(&self.swapchain),
        )?;
        anyhow::ensure!(
            swapchain.compare_formats(&self.swapchain),
            "Swapchain color or depth format changed ({:?} -> {:?})",
            self.swapchain.formats(),
            swapchain.formats()
        );
        drop(std::mem::replace(&mut self.swapchain, swapchain));

        // Semaphores may still be signaled from an abandoned acquire
        self.frame_sync = FrameSync::create_many(&self.device, self.cycle.frames_in_flight())?;
        self.cycle.reset_images(self.swapchain.image_count());

        self.status.recreated();
        log::info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(true)
    }

    pub fn mark_resized(&mut self) {
        self.status.mark_resized();
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent_aspect_ratio()
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.cycle.is_frame_started()
    }

    pub fn current_command_buffer(&self) -> Result<vk::CommandBuffer, FrameError> {
        Ok(self.command_buffers[self.cycle.frame_index()?])
    }

    pub fn frame_index(&self) -> Result<usize, FrameError> {
        self.cycle.frame_index()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.cycle.frames_in_flight()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.swapchain.present_mode
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle before teardown: {:?}", e);
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.device.command_pool, &self.command_buffers);
        }
    }
}
