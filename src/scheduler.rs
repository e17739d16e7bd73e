// =============================================================================
// FRAME SCHEDULER - Per-frame acquire / record / submit / present protocol
// =============================================================================
//
// K frame slots rotate over N swapchain images. The CPU only blocks on
// fences (slot reuse, image reuse); ordering between acquire, rendering and
// presentation is carried by semaphores inside the backend.
//
// The protocol is written against `FrameBackend` so it runs unchanged over
// the Vulkan renderer and over the scripted backend in the tests.

use anyhow::Result;

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::error::RenderError;

/// GPU-side operations the scheduler drives
pub trait FrameBackend {
    /// Images in the live swapchain, 0 when there is none
    fn image_count(&self) -> usize;

    /// Block until the slot's in-flight fence is signaled
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Record the command buffer that draws into `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Reset the slot's fence, then submit: wait image-available, signal
    /// render-finished and the fence
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Present after render-finished
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Tear down and rebuild the swapchain generation. Returns false when the
    /// surface has zero area and no swapchain exists afterwards.
    fn rebuild(&mut self) -> Result<bool>;
}

/// What happened during one `draw_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Drawn and presented
    Presented,
    /// Drawn and presented, then the swapchain was rebuilt
    PresentedThenRebuilt,
    /// Nothing drawn; the swapchain was rebuilt
    Rebuilt,
    /// Nothing drawn; no swapchain to draw into
    Skipped,
}

pub struct FrameScheduler {
    /// Configured K; frame slots exist for all of them
    frames_in_flight: usize,
    /// Slots in rotation, min(K, N) for the live swapchain
    active_slots: usize,
    current_slot: usize,
    /// Slot whose fence guards each swapchain image, if any
    images_in_flight: Vec<Option<usize>>,
    resize_requested: bool,
    frame_count: u64,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Result<Self, RenderError> {
        if frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "at least one frame in flight is required".into(),
            ));
        }
        Ok(Self {
            frames_in_flight,
            active_slots: frames_in_flight,
            current_slot: 0,
            images_in_flight: Vec::new(),
            resize_requested: false,
            frame_count: 0,
        })
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slots actually rotated; never more than the swapchain has images
    pub fn active_slots(&self) -> usize {
        self.active_slots
    }

    /// Frames presented so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The window changed size; rebuild after the next present
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Track a new swapchain: clear image ownership and keep K <= N
    fn reset_image_table<B: FrameBackend>(&mut self, backend: &B) {
        let image_count = backend.image_count();
        self.images_in_flight = vec![None; image_count];
        if image_count == 0 {
            return;
        }

        let active = self.frames_in_flight.min(image_count);
        if active != self.active_slots {
            if active < self.frames_in_flight {
                log::info!(
                    "Swapchain has {} images, rotating {} of {} frame slots",
                    image_count,
                    active,
                    self.frames_in_flight
                );
            }
            self.active_slots = active;
        }
        self.current_slot %= self.active_slots;
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> Result<bool> {
        self.resize_requested = false;
        let live = backend.rebuild()?;
        self.reset_image_table(backend);
        Ok(live)
    }

    /// Run one iteration of the frame protocol
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        // No swapchain (zero-area window): only a resize can bring it back
        if backend.image_count() == 0 {
            if self.resize_requested && self.rebuild(backend)? {
                return Ok(FrameOutcome::Rebuilt);
            }
            return Ok(FrameOutcome::Skipped);
        }

        if self.images_in_flight.len() != backend.image_count() {
            self.reset_image_table(backend);
        }

        let slot = self.current_slot;
        backend.wait_for_slot(slot)?;

        let (image_index, suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Acquire reported out-of-date, rebuilding");
                self.rebuild(backend)?;
                return Ok(FrameOutcome::Rebuilt);
            }
        };

        // An earlier slot may still be rendering into this image
        let image = image_index as usize;
        if let Some(owner) = self.images_in_flight[image] {
            if owner != slot {
                backend.wait_for_slot(owner)?;
            }
        }
        self.images_in_flight[image] = Some(slot);

        backend.record(slot, image_index)?;
        backend.submit(slot, image_index)?;
        let presented = backend.present(slot, image_index)?;

        self.current_slot = (slot + 1) % self.active_slots;
        self.frame_count += 1;

        if presented.is_stale() || suboptimal || self.resize_requested {
            log::debug!(
                "Rebuilding after present (present: {:?}, suboptimal acquire: {}, resize: {})",
                presented,
                suboptimal,
                self.resize_requested
            );
            self.rebuild(backend)?;
            return Ok(FrameOutcome::PresentedThenRebuilt);
        }

        Ok(FrameOutcome::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
        Rebuild,
    }

    /// Backend that hands out images round-robin unless a result is scripted
    struct ScriptedBackend {
        image_count: usize,
        next_image: u32,
        acquire_script: VecDeque<Result<AcquireOutcome, RenderError>>,
        present_script: VecDeque<PresentOutcome>,
        /// Image count after a rebuild; 0 simulates a zero-area window
        rebuilt_image_count: usize,
        calls: Vec<Call>,
    }

    impl ScriptedBackend {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                rebuilt_image_count: image_count,
                calls: Vec::new(),
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn presents(&self) -> usize {
            self.count(|c| matches!(c, Call::Present(..)))
        }

        fn records(&self) -> usize {
            self.count(|c| matches!(c, Call::Record(..)))
        }

        fn rebuilds(&self) -> usize {
            self.count(|c| matches!(c, Call::Rebuild))
        }
    }

    impl FrameBackend for ScriptedBackend {
        fn image_count(&self) -> usize {
            self.image_count
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted?);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal: false,
            })
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn rebuild(&mut self) -> Result<bool> {
            self.calls.push(Call::Rebuild);
            self.image_count = self.rebuilt_image_count;
            self.next_image = 0;
            Ok(self.image_count > 0)
        }
    }

    #[test]
    fn test_slot_returns_to_zero_after_k_frames() {
        for k in 1..=4 {
            let mut backend = ScriptedBackend::new(4);
            let mut scheduler = FrameScheduler::new(k).unwrap();
            for _ in 0..k {
                assert_eq!(
                    scheduler.draw_frame(&mut backend).unwrap(),
                    FrameOutcome::Presented
                );
            }
            assert_eq!(scheduler.current_slot(), 0);
            assert_eq!(scheduler.frame_count(), k as u64);
        }
    }

    #[test]
    fn test_frame_protocol_order() {
        let mut backend = ScriptedBackend::new(3);
        let mut scheduler = FrameScheduler::new(2).unwrap();
        scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn test_out_of_date_acquire_skips_draw_and_present() {
        let mut backend = ScriptedBackend::new(3);
        backend
            .acquire_script
            .push_back(Ok(AcquireOutcome::OutOfDate));
        let mut scheduler = FrameScheduler::new(2).unwrap();

        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Rebuilt
        );
        assert_eq!(backend.records(), 0);
        assert_eq!(backend.presents(), 0);
        assert_eq!(backend.rebuilds(), 1);
        // No submission happened, so the slot is not consumed
        assert_eq!(scheduler.current_slot(), 0);

        // The next iteration proceeds normally on the rebuilt chain
        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(backend.presents(), 1);
        assert_eq!(backend.rebuilds(), 1);
    }

    #[test]
    fn test_waits_for_image_still_in_flight() {
        // N = 3 images, K = 2 slots; the fourth acquire returns image 0,
        // which slot 0 rendered, while the current slot is 1
        let mut backend = ScriptedBackend::new(3);
        let mut scheduler = FrameScheduler::new(2).unwrap();
        for _ in 0..3 {
            scheduler.draw_frame(&mut backend).unwrap();
        }
        assert_eq!(scheduler.current_slot(), 1);

        backend.calls.clear();
        scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(1),
                Call::Acquire(1),
                Call::Wait(0),
                Call::Record(1, 0),
                Call::Submit(1, 0),
                Call::Present(1, 0),
            ]
        );
    }

    #[test]
    fn test_no_extra_wait_when_image_owned_by_current_slot() {
        // N = K = 2: image i is always drawn by slot i
        let mut backend = ScriptedBackend::new(2);
        let mut scheduler = FrameScheduler::new(2).unwrap();
        for _ in 0..6 {
            scheduler.draw_frame(&mut backend).unwrap();
        }
        assert_eq!(backend.count(|c| matches!(c, Call::Wait(_))), 6);
    }

    #[test]
    fn test_stale_present_triggers_rebuild() {
        for stale in [PresentOutcome::OutOfDate, PresentOutcome::Suboptimal] {
            let mut backend = ScriptedBackend::new(3);
            backend.present_script.push_back(stale);
            let mut scheduler = FrameScheduler::new(2).unwrap();

            assert_eq!(
                scheduler.draw_frame(&mut backend).unwrap(),
                FrameOutcome::PresentedThenRebuilt
            );
            assert_eq!(backend.presents(), 1);
            assert_eq!(backend.rebuilds(), 1);
            assert_eq!(scheduler.current_slot(), 1);
        }
    }

    #[test]
    fn test_suboptimal_acquire_draws_then_rebuilds() {
        let mut backend = ScriptedBackend::new(3);
        backend.acquire_script.push_back(Ok(AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: true,
        }));
        let mut scheduler = FrameScheduler::new(2).unwrap();

        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::PresentedThenRebuilt
        );
        assert_eq!(backend.records(), 1);
        assert_eq!(backend.presents(), 1);
        assert_eq!(backend.rebuilds(), 1);
    }

    #[test]
    fn test_resize_flag_rebuilds_after_present() {
        let mut backend = ScriptedBackend::new(3);
        let mut scheduler = FrameScheduler::new(2).unwrap();
        scheduler.request_resize();

        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::PresentedThenRebuilt
        );
        assert!(!scheduler.resize_requested);
        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(backend.rebuilds(), 1);
    }

    #[test]
    fn test_rebuild_twice_keeps_image_count() {
        let mut backend = ScriptedBackend::new(3);
        let mut scheduler = FrameScheduler::new(2).unwrap();
        scheduler.request_resize();
        scheduler.draw_frame(&mut backend).unwrap();
        let after_first = backend.image_count();
        scheduler.request_resize();
        scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(backend.image_count(), after_first);
        assert_eq!(backend.rebuilds(), 2);
    }

    #[test]
    fn test_zero_area_defers_until_resize() {
        let mut backend = ScriptedBackend::new(3);
        backend.rebuilt_image_count = 0;
        let mut scheduler = FrameScheduler::new(2).unwrap();
        scheduler.request_resize();
        scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(backend.image_count(), 0);

        // Minimized: nothing happens until the window reports a new size
        for _ in 0..3 {
            assert_eq!(
                scheduler.draw_frame(&mut backend).unwrap(),
                FrameOutcome::Skipped
            );
        }
        assert_eq!(backend.rebuilds(), 1);

        backend.rebuilt_image_count = 3;
        scheduler.request_resize();
        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Rebuilt
        );
        assert_eq!(
            scheduler.draw_frame(&mut backend).unwrap(),
            FrameOutcome::Presented
        );
    }

    #[test]
    fn test_image_table_follows_new_image_count() {
        let mut backend = ScriptedBackend::new(2);
        backend.rebuilt_image_count = 4;
        let mut scheduler = FrameScheduler::new(2).unwrap();
        scheduler.request_resize();
        scheduler.draw_frame(&mut backend).unwrap();

        // Images 2 and 3 only exist after the rebuild
        for _ in 0..4 {
            scheduler.draw_frame(&mut backend).unwrap();
        }
        assert!(backend.calls.contains(&Call::Record(0, 3)) || backend.calls.contains(&Call::Record(1, 3)));
    }

    #[test]
    fn test_device_loss_on_acquire_is_fatal() {
        let mut backend = ScriptedBackend::new(3);
        backend
            .acquire_script
            .push_back(Err(RenderError::Device(ash::vk::Result::ERROR_DEVICE_LOST)));
        let mut scheduler = FrameScheduler::new(2).unwrap();

        let err = scheduler.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::Device(ash::vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(backend.records(), 0);
        assert_eq!(backend.rebuilds(), 0);
    }

    #[test]
    fn test_slots_never_exceed_image_count() {
        // K = 4 configured, but the surface only gave N = 2 images
        let mut backend = ScriptedBackend::new(2);
        let mut scheduler = FrameScheduler::new(4).unwrap();
        for _ in 0..6 {
            assert_eq!(
                scheduler.draw_frame(&mut backend).unwrap(),
                FrameOutcome::Presented
            );
        }
        assert_eq!(scheduler.active_slots(), 2);
        assert_eq!(scheduler.frames_in_flight(), 4);
        assert!(backend
            .calls
            .iter()
            .all(|c| !matches!(c, Call::Record(slot, _) if *slot >= 2)));

        // A larger chain after a rebuild puts every slot back in rotation
        backend.rebuilt_image_count = 5;
        scheduler.request_resize();
        scheduler.draw_frame(&mut backend).unwrap();
        assert_eq!(scheduler.active_slots(), 4);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        assert!(matches!(
            FrameScheduler::new(0),
            Err(RenderError::InvalidConfig(_))
        ));
    }
}
