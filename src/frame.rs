//! Frame lifecycle state.
//!
//! [`FrameCycle`] is the bookkeeping half of the renderer: which
//! frame-in-flight slot is current, which swapchain image is being drawn,
//! which phase of the frame we are in, and which fence last claimed each
//! swapchain image. It holds no GPU objects, so every transition can be
//! checked without a device.
//!
//! ```text
//!            begin(image)          begin_render_pass()
//!   Idle ──────────────────► Recording ─────────────────► InRenderPass
//!    ▲                        │     ▲                          │
//!    │        end()           │     │     end_render_pass()    │
//!    └────────────────────────┘     └──────────────────────────┘
//! ```
//!
//! `end()` advances the slot: `(slot + 1) % frames_in_flight`.

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

use crate::scene::Camera;

/// Illegal use of the begin/end contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("cannot begin a frame while frame {0} is still in progress")]
    AlreadyStarted(usize),
    #[error("no frame is in progress")]
    NotStarted,
    #[error("a render pass is already active in this frame")]
    RenderPassActive,
    #[error("no render pass is active in this frame")]
    RenderPassInactive,
    #[error("command buffer does not belong to the current frame")]
    ForeignCommandBuffer,
    #[error("swapchain image {index} out of range ({count} images)")]
    ImageOutOfRange { index: u32, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Recording,
    InRenderPass,
}

/// What came back from `vkAcquireNextImageKHR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. A suboptimal image can still be rendered and
    /// presented, but the swapchain should be rebuilt afterwards.
    Ready { image_index: u32, suboptimal: bool },
    /// Nothing was acquired and no semaphore was signaled.
    OutOfDate,
}

impl AcquireOutcome {
    pub fn from_result(result: VkResult<(u32, bool)>) -> Result<Self, vk::Result> {
        match result {
            Ok((image_index, suboptimal)) => Ok(Self::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(e),
        }
    }
}

/// What came back from `vkQueuePresentKHR`, folded with the window's own
/// resize notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The swapchain no longer matches the surface and must be rebuilt.
    Stale,
}

impl PresentOutcome {
    pub fn from_result(result: VkResult<bool>, window_resized: bool) -> Result<Self, vk::Result> {
        match result {
            Ok(false) if !window_resized => Ok(Self::Presented),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::Stale),
            Err(e) => Err(e),
        }
    }
}

/// Whether the swapchain must be rebuilt before the next frame.
///
/// Folds the window's resize notification and every acquire/present result
/// into one flag. It stays raised until [`SwapchainStatus::recreated`], so a
/// rebuild skipped while the window has no area is retried next frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainStatus {
    framebuffer_resized: bool,
    needs_recreate: bool,
}

impl SwapchainStatus {
    /// The driver does not always report a resize, so the window does.
    pub fn mark_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    pub fn should_recreate(&self) -> bool {
        self.framebuffer_resized || self.needs_recreate
    }

    /// Image to render into, or `None` when the frame has to be skipped.
    ///
    /// A suboptimal image is still used; the rebuild happens after present.
    pub fn on_acquire(&mut self, outcome: AcquireOutcome) -> Option<u32> {
        match outcome {
            AcquireOutcome::OutOfDate => {
                self.needs_recreate = true;
                None
            }
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => {
                self.needs_recreate |= suboptimal;
                Some(image_index)
            }
        }
    }

    /// Classify a present result. `Ok(true)` means rebuild now.
    pub fn on_present(&mut self, result: VkResult<bool>) -> Result<bool, vk::Result> {
        if PresentOutcome::from_result(result, self.framebuffer_resized)? == PresentOutcome::Stale {
            self.needs_recreate = true;
        }
        Ok(self.should_recreate())
    }

    pub fn recreated(&mut self) {
        *self = Self::default();
    }
}

/// Frame phase, slot index and swapchain-image ownership.
#[derive(Debug)]
pub struct FrameCycle {
    frames_in_flight: usize,
    current_frame: usize,
    image_index: u32,
    phase: FramePhase,
    /// Fence of the submission that last rendered into each swapchain image.
    images_in_flight: Vec<vk::Fence>,
}

impl FrameCycle {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            image_index: 0,
            phase: FramePhase::Idle,
            images_in_flight: vec![vk::Fence::null(); image_count],
        }
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    #[inline]
    pub fn is_frame_started(&self) -> bool {
        self.phase != FramePhase::Idle
    }

    /// Slot whose sync objects and command buffer the next frame uses.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_frame
    }

    /// Slot of the frame in progress.
    pub fn frame_index(&self) -> Result<usize, FrameError> {
        self.ensure_started()?;
        Ok(self.current_frame)
    }

    /// Swapchain image of the frame in progress.
    pub fn image_index(&self) -> Result<u32, FrameError> {
        self.ensure_started()?;
        Ok(self.image_index)
    }

    pub fn ensure_idle(&self) -> Result<(), FrameError> {
        if self.is_frame_started() {
            return Err(FrameError::AlreadyStarted(self.current_frame));
        }
        Ok(())
    }

    pub fn ensure_started(&self) -> Result<(), FrameError> {
        if !self.is_frame_started() {
            return Err(FrameError::NotStarted);
        }
        Ok(())
    }

    /// Checks that `end()` would succeed, so the caller can finish GPU work
    /// before committing the transition.
    pub fn ensure_can_end(&self) -> Result<(), FrameError> {
        match self.phase {
            FramePhase::Idle => Err(FrameError::NotStarted),
            FramePhase::InRenderPass => Err(FrameError::RenderPassActive),
            FramePhase::Recording => Ok(()),
        }
    }

    /// Start a frame that renders into `image_index`.
    pub fn begin(&mut self, image_index: u32) -> Result<(), FrameError> {
        self.ensure_idle()?;
        self.check_image(image_index)?;
        self.image_index = image_index;
        self.phase = FramePhase::Recording;
        Ok(())
    }

    /// Record that the current slot's `fence` now owns `image_index`.
    ///
    /// Returns the fence of an earlier frame still associated with that
    /// image, which the caller must wait on before touching the image.
    /// The slot's own fence is never returned; it was waited on already.
    pub fn claim_image(
        &mut self,
        image_index: u32,
        fence: vk::Fence,
    ) -> Result<Option<vk::Fence>, FrameError> {
        self.check_image(image_index)?;
        let previous = std::mem::replace(&mut self.images_in_flight[image_index as usize], fence);
        if previous == vk::Fence::null() || previous == fence {
            Ok(None)
        } else {
            Ok(Some(previous))
        }
    }

    pub fn begin_render_pass(&mut self) -> Result<(), FrameError> {
        match self.phase {
            FramePhase::Idle => Err(FrameError::NotStarted),
            FramePhase::InRenderPass => Err(FrameError::RenderPassActive),
            FramePhase::Recording => {
                self.phase = FramePhase::InRenderPass;
                Ok(())
            }
        }
    }

    pub fn end_render_pass(&mut self) -> Result<(), FrameError> {
        match self.phase {
            FramePhase::Idle => Err(FrameError::NotStarted),
            FramePhase::Recording => Err(FrameError::RenderPassInactive),
            FramePhase::InRenderPass => {
                self.phase = FramePhase::Recording;
                Ok(())
            }
        }
    }

    /// Finish the frame and move to the next slot.
    pub fn end(&mut self) -> Result<(), FrameError> {
        self.ensure_can_end()?;
        self.phase = FramePhase::Idle;
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        Ok(())
    }

    /// Drop the frame in progress without advancing the slot.
    pub fn abort(&mut self) {
        self.phase = FramePhase::Idle;
    }

    /// Drop the frame in progress after its sync objects were replaced.
    ///
    /// Every recorded image owner is a fence that no longer exists, so
    /// ownership is cleared along with the phase. The slot does not advance.
    pub fn abandon(&mut self) {
        self.abort();
        let count = self.images_in_flight.len();
        self.reset_images(count);
    }

    /// Forget image ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, vk::Fence::null());
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    fn check_image(&self, image_index: u32) -> Result<(), FrameError> {
        if image_index as usize >= self.images_in_flight.len() {
            return Err(FrameError::ImageOutOfRange {
                index: image_index,
                count: self.images_in_flight.len(),
            });
        }
        Ok(())
    }
}

/// Everything a render system needs to record one frame.
pub struct FrameInfo<'a> {
    pub frame_index: usize,
    pub frame_time: f32,
    pub command_buffer: vk::CommandBuffer,
    pub camera: &'a Camera,
    pub global_descriptor_set: vk::DescriptorSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    #[test]
    fn test_full_frame_advances_slot() {
        let mut cycle = FrameCycle::new(2, 3);
        assert_eq!(cycle.current_slot(), 0);

        cycle.begin(1).unwrap();
        assert_eq!(cycle.frame_index(), Ok(0));
        assert_eq!(cycle.image_index(), Ok(1));
        cycle.begin_render_pass().unwrap();
        cycle.end_render_pass().unwrap();
        cycle.end().unwrap();

        assert_eq!(cycle.phase(), FramePhase::Idle);
        assert_eq!(cycle.current_slot(), 1);

        cycle.begin(2).unwrap();
        cycle.end().unwrap();
        assert_eq!(cycle.current_slot(), 0);
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut cycle = FrameCycle::new(2, 2);
        cycle.begin(0).unwrap();
        assert_eq!(cycle.begin(1), Err(FrameError::AlreadyStarted(0)));
        // The failed call must not disturb the frame in progress
        assert_eq!(cycle.image_index(), Ok(0));
    }

    #[test]
    fn test_queries_require_started_frame() {
        let cycle = FrameCycle::new(2, 2);
        assert_eq!(cycle.frame_index(), Err(FrameError::NotStarted));
        assert_eq!(cycle.image_index(), Err(FrameError::NotStarted));
    }

    #[test]
    fn test_end_without_begin() {
        let mut cycle = FrameCycle::new(2, 2);
        assert_eq!(cycle.end(), Err(FrameError::NotStarted));
        assert_eq!(cycle.current_slot(), 0);
    }

    #[test]
    fn test_end_inside_render_pass_is_rejected() {
        let mut cycle = FrameCycle::new(2, 2);
        cycle.begin(0).unwrap();
        cycle.begin_render_pass().unwrap();
        assert_eq!(cycle.end(), Err(FrameError::RenderPassActive));
        assert_eq!(cycle.begin_render_pass(), Err(FrameError::RenderPassActive));
    }

    #[test]
    fn test_render_pass_transitions() {
        let mut cycle = FrameCycle::new(2, 2);
        assert_eq!(cycle.begin_render_pass(), Err(FrameError::NotStarted));
        cycle.begin(0).unwrap();
        assert_eq!(cycle.end_render_pass(), Err(FrameError::RenderPassInactive));
        cycle.begin_render_pass().unwrap();
        assert_eq!(cycle.phase(), FramePhase::InRenderPass);
        cycle.end_render_pass().unwrap();
        assert_eq!(cycle.phase(), FramePhase::Recording);
    }

    #[test]
    fn test_image_index_out_of_range() {
        let mut cycle = FrameCycle::new(2, 3);
        assert_eq!(
            cycle.begin(3),
            Err(FrameError::ImageOutOfRange { index: 3, count: 3 })
        );
        assert!(!cycle.is_frame_started());
    }

    #[test]
    fn test_abort_keeps_slot() {
        let mut cycle = FrameCycle::new(2, 2);
        cycle.begin(1).unwrap();
        cycle.abort();
        assert!(!cycle.is_frame_started());
        assert_eq!(cycle.current_slot(), 0);
    }

    #[test]
    fn test_abandon_after_claim_leaves_no_owner() {
        let mut cycle = FrameCycle::new(2, 3);
        assert_eq!(cycle.claim_image(1, fence(10)), Ok(None));
        cycle.begin(1).unwrap();

        // Submit failed with the slot fence already reset
        cycle.abandon();

        assert!(!cycle.is_frame_started());
        assert_eq!(cycle.current_slot(), 0);
        assert_eq!(cycle.image_count(), 3);
        // The dead fence must never be handed out as something to wait on
        assert_eq!(cycle.claim_image(1, fence(20)), Ok(None));
    }

    #[test]
    fn test_abort_after_claim_keeps_owner() {
        let mut cycle = FrameCycle::new(2, 2);
        cycle.claim_image(0, fence(10)).unwrap();
        cycle.begin(0).unwrap();
        cycle.abort();
        assert_eq!(cycle.claim_image(0, fence(20)), Ok(Some(fence(10))));
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame_and_stays_pending() {
        let mut status = SwapchainStatus::default();
        assert!(!status.should_recreate());

        assert_eq!(status.on_acquire(AcquireOutcome::OutOfDate), None);
        assert!(status.should_recreate());

        // Rebuild skipped while minimized: the request survives
        assert_eq!(status.on_acquire(AcquireOutcome::OutOfDate), None);
        assert!(status.should_recreate());

        status.recreated();
        assert!(!status.should_recreate());
    }

    #[test]
    fn test_suboptimal_acquire_rebuilds_after_present() {
        let mut status = SwapchainStatus::default();
        let ready = AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: true,
        };
        assert_eq!(status.on_acquire(ready), Some(1));
        assert!(status.should_recreate());
        assert_eq!(status.on_present(Ok(false)), Ok(true));
    }

    #[test]
    fn test_clean_frame_needs_no_rebuild() {
        let mut status = SwapchainStatus::default();
        let ready = AcquireOutcome::Ready {
            image_index: 0,
            suboptimal: false,
        };
        assert_eq!(status.on_acquire(ready), Some(0));
        assert_eq!(status.on_present(Ok(false)), Ok(false));
    }

    #[test]
    fn test_resize_is_folded_into_present() {
        let mut status = SwapchainStatus::default();
        status.mark_resized();
        assert!(status.should_recreate());
        assert_eq!(status.on_present(Ok(false)), Ok(true));

        let mut status = SwapchainStatus::default();
        assert_eq!(status.on_present(Ok(true)), Ok(true));
        let mut status = SwapchainStatus::default();
        assert_eq!(
            status.on_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(true)
        );
        let mut status = SwapchainStatus::default();
        assert_eq!(
            status.on_present(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(vk::Result::ERROR_DEVICE_LOST)
        );
        assert!(!status.should_recreate());
    }

    #[test]
    fn test_single_frame_in_flight_wraps_to_zero() {
        let mut cycle = FrameCycle::new(0, 2);
        assert_eq!(cycle.frames_in_flight(), 1);
        cycle.begin(0).unwrap();
        cycle.end().unwrap();
        assert_eq!(cycle.current_slot(), 0);
    }

    #[test]
    fn test_claim_image_returns_other_slot_fence() {
        let mut cycle = FrameCycle::new(2, 3);

        // First use of the image: nothing to wait on
        assert_eq!(cycle.claim_image(2, fence(10)), Ok(None));
        // Same slot reclaims it: its fence was already waited on
        assert_eq!(cycle.claim_image(2, fence(10)), Ok(None));
        // Another slot takes it over: must wait for the first slot's work
        assert_eq!(cycle.claim_image(2, fence(20)), Ok(Some(fence(10))));
        assert_eq!(cycle.claim_image(2, fence(10)), Ok(Some(fence(20))));
    }

    #[test]
    fn test_reset_images_forgets_ownership() {
        let mut cycle = FrameCycle::new(2, 2);
        cycle.claim_image(0, fence(7)).unwrap();

        cycle.reset_images(4);
        assert_eq!(cycle.image_count(), 4);
        assert_eq!(cycle.claim_image(0, fence(8)), Ok(None));
        assert_eq!(cycle.claim_image(3, fence(8)), Ok(None));
    }

    #[test]
    fn test_acquire_outcome_classification() {
        assert_eq!(
            AcquireOutcome::from_result(Ok((2, false))),
            Ok(AcquireOutcome::Ready {
                image_index: 2,
                suboptimal: false
            })
        );
        assert_eq!(
            AcquireOutcome::from_result(Ok((0, true))),
            Ok(AcquireOutcome::Ready {
                image_index: 0,
                suboptimal: true
            })
        );
        assert_eq!(
            AcquireOutcome::from_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(AcquireOutcome::OutOfDate)
        );
        assert_eq!(
            AcquireOutcome::from_result(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(vk::Result::ERROR_DEVICE_LOST)
        );
    }

    #[test]
    fn test_present_outcome_classification() {
        assert_eq!(
            PresentOutcome::from_result(Ok(false), false),
            Ok(PresentOutcome::Presented)
        );
        assert_eq!(
            PresentOutcome::from_result(Ok(true), false),
            Ok(PresentOutcome::Stale)
        );
        assert_eq!(
            PresentOutcome::from_result(Ok(false), true),
            Ok(PresentOutcome::Stale)
        );
        assert_eq!(
            PresentOutcome::from_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), false),
            Ok(PresentOutcome::Stale)
        );
        assert_eq!(
            PresentOutcome::from_result(Err(vk::Result::ERROR_SURFACE_LOST_KHR), true),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR)
        );
    }
}
