//! Shared-memory layout contract for the image slot.
//!
//! A slot region is a fixed-size header of 32-bit words followed by the
//! pixel byte buffer. The header is defined as atomics so that both sides
//! of the process boundary (producer and viewer) can poke individual cells
//! without mapping-wide synchronization; only the shape words and the pixel
//! bytes are guarded by the slot lock.

use siv_image::Dtype;

/// `b"SIV1"` as a little-endian `u32`.
pub const SLOT_MAGIC: u32 = 0x3156_4953;

/// Slot shared-memory ABI version.
pub const SLOT_VERSION: u32 = 1;

/// Number of 32-bit words in the slot header.
pub const HEADER_U32_LEN: usize = 16;

/// Header size in bytes. The pixel buffer starts at this offset.
pub const HEADER_BYTES: usize = HEADER_U32_LEN * 4;

/// Default capacity, sized for the largest image ever expected
/// (2x3840 x 2x2160 x 3 channels).
pub const DEFAULT_CAPACITY_SAMPLES: u32 = 2 * 3840 * 2 * 2160 * 3;

pub mod header_index {
    //! Indices into the slot header when viewed as a `u32[]`.

    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 1;
    /// Buffer lock word: 0 free, 1 held. Guards shape + pixel bytes.
    pub const LOCK: usize = 2;
    pub const HAS_NEW_IMAGE: usize = 3;
    pub const SHOULD_QUIT: usize = 4;
    pub const PAUSED: usize = 5;
    pub const HIDDEN: usize = 6;
    pub const STARTED: usize = 7;
    pub const HEIGHT: usize = 8;
    pub const WIDTH: usize = 9;
    pub const CHANNELS: usize = 10;
    pub const DTYPE: usize = 11;
    /// Capacity in samples (not bytes).
    pub const CAPACITY: usize = 12;
    pub const WINDOW_WIDTH: usize = 13;
    pub const WINDOW_HEIGHT: usize = 14;
    pub const RESERVED: usize = 15;
}

/// Total region size for a slot of `capacity` samples of `dtype`.
pub fn region_len(capacity: u32, dtype: Dtype) -> usize {
    HEADER_BYTES + capacity as usize * dtype.sample_size()
}
