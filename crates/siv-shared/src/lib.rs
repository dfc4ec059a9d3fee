//! Shared-memory slot between an image producer and its viewer process.
//!
//! The producer writes the latest image into a fixed-capacity region; the
//! viewer's compute thread polls it and copies new frames out. See
//! [`slot::SharedImageSlot`] for the locking discipline.

pub mod layout;
pub mod slot;

pub use slot::{SharedImageSlot, SlotError};
