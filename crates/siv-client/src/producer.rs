//! Producer side of the shared slot.
//!
//! Pushing is fire-and-forget with last-value-wins semantics: the producer
//! never waits on the viewer's render loop, only on the slot's bounded
//! buffer lock. A dead or missing viewer makes pushes silent no-ops so
//! instrumented training code keeps running unchanged.

use std::process::Child;
use std::sync::{Arc, Mutex};

use siv_image::{Image, ImageError};
use siv_shared::{SharedImageSlot, SlotError};
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Copy, Clone, Debug, Default)]
pub struct PushOptions {
    /// Write even while the viewer is paused.
    pub ignore_pause: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    ViewerNotRunning,
    Paused,
}

/// What happened to a push. Skips are expected outcomes, not errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Written,
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("both an HWC and a CHW image were supplied")]
    AmbiguousLayout,
    #[error("no image was supplied")]
    MissingImage,
}

/// Handle used by the producing process to publish frames.
///
/// Cheap to clone; all clones publish into the same slot.
#[derive(Clone)]
pub struct ProducerHandle {
    slot: Arc<SharedImageSlot>,
    /// Child handle of the viewer process, when one was spawned. `None`
    /// means in-process use, which counts as always alive.
    child: Option<Arc<Mutex<Option<Child>>>>,
}

impl ProducerHandle {
    /// Handle without an attached viewer process; the viewer is assumed
    /// alive (the in-process and test topology).
    pub fn new(slot: Arc<SharedImageSlot>) -> Self {
        Self { slot, child: None }
    }

    /// Handle whose liveness probe follows the given child process.
    pub(crate) fn with_child(slot: Arc<SharedImageSlot>, child: Arc<Mutex<Option<Child>>>) -> Self {
        Self {
            slot,
            child: Some(child),
        }
    }

    pub fn slot(&self) -> &SharedImageSlot {
        &self.slot
    }

    fn viewer_alive(&self) -> bool {
        let Some(child) = &self.child else {
            return true;
        };
        let mut guard = child.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            None => false,
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) => false,
                Err(err) => {
                    warn!(error = %err, "viewer liveness probe failed");
                    false
                }
            },
        }
    }

    /// Publishes `image` as the latest frame.
    ///
    /// The image is converted to the slot's sample type first (a borrow,
    /// not a copy, when it is already canonical); validation and capacity
    /// failures return before any shared state changes.
    pub fn push(&self, image: &Image, options: PushOptions) -> Result<PushOutcome, PushError> {
        if !self.viewer_alive() {
            trace!("push skipped, viewer process not running");
            return Ok(PushOutcome::Skipped(SkipReason::ViewerNotRunning));
        }
        if self.slot.paused() && !options.ignore_pause {
            trace!("push skipped, viewer paused");
            return Ok(PushOutcome::Skipped(SkipReason::Paused));
        }
        let normalized = image.normalized(self.slot.dtype());
        self.slot.write(&normalized)?;
        Ok(PushOutcome::Written)
    }

    /// Publishes whichever of the two layout arguments is given.
    ///
    /// Exactly one must be `Some`; callers that already hold an [`Image`]
    /// should use [`ProducerHandle::push`] directly.
    pub fn push_either(
        &self,
        hwc: Option<&Image>,
        chw: Option<&Image>,
        options: PushOptions,
    ) -> Result<PushOutcome, PushError> {
        match (hwc, chw) {
            (Some(_), Some(_)) => Err(PushError::AmbiguousLayout),
            (None, None) => Err(PushError::MissingImage),
            (Some(image), None) | (None, Some(image)) => self.push(image, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siv_image::{Dtype, Samples};

    fn slot() -> Arc<SharedImageSlot> {
        Arc::new(SharedImageSlot::create_in_memory(4 * 4 * 3, Dtype::U8).unwrap())
    }

    fn frame(fill: u8) -> Image {
        Image::from_hwc(2, 2, 3, Samples::U8(vec![fill; 12])).unwrap()
    }

    #[test]
    fn paused_skips_without_mutation() {
        let slot = slot();
        slot.set_paused(true);
        let handle = ProducerHandle::new(slot.clone());

        let outcome = handle.push(&frame(7), PushOptions::default()).unwrap();
        assert_eq!(outcome, PushOutcome::Skipped(SkipReason::Paused));
        assert!(!slot.has_new_image());
    }

    #[test]
    fn ignore_pause_writes_through() {
        let slot = slot();
        slot.set_paused(true);
        let handle = ProducerHandle::new(slot.clone());

        let outcome = handle
            .push(&frame(7), PushOptions { ignore_pause: true })
            .unwrap();
        assert_eq!(outcome, PushOutcome::Written);
        assert!(slot.has_new_image());
    }

    #[test]
    fn float_input_lands_in_u8_slot() {
        let slot = slot();
        let handle = ProducerHandle::new(slot.clone());
        let image = Image::from_hwc(2, 2, 3, Samples::F32(vec![1.0; 12])).unwrap();

        assert_eq!(
            handle.push(&image, PushOptions::default()).unwrap(),
            PushOutcome::Written
        );
        let read = slot.read_if_new().unwrap();
        assert_eq!(read.samples(), &Samples::U8(vec![255; 12]));
    }

    #[test]
    fn oversized_push_is_a_synchronous_error() {
        let slot = slot();
        let handle = ProducerHandle::new(slot.clone());
        let big = Image::from_hwc(8, 8, 3, Samples::U8(vec![0; 192])).unwrap();

        assert!(matches!(
            handle.push(&big, PushOptions::default()),
            Err(PushError::Slot(SlotError::CapacityExceeded { .. }))
        ));
        assert!(!slot.has_new_image());
    }

    #[test]
    fn push_either_rejects_both_and_neither() {
        let handle = ProducerHandle::new(slot());
        let image = frame(1);

        assert!(matches!(
            handle.push_either(Some(&image), Some(&image), PushOptions::default()),
            Err(PushError::AmbiguousLayout)
        ));
        assert!(matches!(
            handle.push_either(None, None, PushOptions::default()),
            Err(PushError::MissingImage)
        ));
        assert_eq!(
            handle
                .push_either(None, Some(&image), PushOptions::default())
                .unwrap(),
            PushOutcome::Written
        );
    }

    #[test]
    fn missing_child_counts_as_not_running() {
        let slot = slot();
        let handle = ProducerHandle::with_child(slot.clone(), Arc::new(Mutex::new(None)));

        let outcome = handle.push(&frame(1), PushOptions::default()).unwrap();
        assert_eq!(outcome, PushOutcome::Skipped(SkipReason::ViewerNotRunning));
        assert!(!slot.has_new_image());
    }
}
