//! The shared image slot: one fixed-capacity pixel buffer plus control
//! flags, shared between the producer process and the viewer process.
//!
//! Concurrency discipline:
//! - The shape words and the pixel bytes are updated together only while
//!   the word-sized slot lock is held, so a reader either sees a fully
//!   consistent old image+shape pair or a fully consistent new one, never a
//!   torn combination.
//! - Critical sections are bounded copies; both sides copy in/out under the
//!   lock rather than handing out references, so neither side can stall the
//!   other beyond one memcpy.
//! - The scalar flags (`should_quit`, `paused`, `hidden`, `started`, window
//!   size) are independent atomics and never take the buffer lock.
//!
//! This is a last-value-wins channel: an unread image is silently
//! overwritten by the next write, not queued.

use std::alloc::{self, Layout};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::MmapMut;
use siv_image::{Dtype, Image, ImageShape};
use thiserror::Error;

use crate::layout::{region_len, HEADER_BYTES, SLOT_MAGIC, SLOT_VERSION};

/// Slot header, overlaid on the first [`HEADER_BYTES`] of the region.
///
/// Field order must match [`crate::layout::header_index`].
#[repr(C, align(64))]
struct SlotHeader {
    magic: AtomicU32,
    version: AtomicU32,
    /// Buffer lock word: 0 free, 1 held. Guards shape + pixel bytes.
    lock: AtomicU32,
    has_new_image: AtomicU32,
    should_quit: AtomicU32,
    paused: AtomicU32,
    hidden: AtomicU32,
    started: AtomicU32,
    height: AtomicU32,
    width: AtomicU32,
    channels: AtomicU32,
    dtype: AtomicU32,
    /// Capacity in samples (not bytes). Immutable after creation.
    capacity: AtomicU32,
    window_width: AtomicU32,
    window_height: AtomicU32,
    reserved: AtomicU32,
}

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("image of {samples} samples exceeds slot capacity of {capacity}")]
    CapacityExceeded { samples: u64, capacity: u32 },

    #[error("image dtype {actual:?} does not match slot dtype {expected:?}")]
    DtypeMismatch { expected: Dtype, actual: Dtype },

    #[error("bad slot region: {0}")]
    BadRegion(&'static str),

    #[error("slot I/O: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
enum Storage {
    Heap {
        ptr: NonNull<u8>,
        layout: Layout,
    },
    Mapped {
        /// Writable base, captured once from the mapping. The mapped pages
        /// stay at this address while `map` is alive; moving the handle
        /// does not move them.
        ptr: NonNull<u8>,
        map: MmapMut,
    },
}

impl Storage {
    fn from_map(mut map: MmapMut) -> Result<Self, SlotError> {
        let ptr =
            NonNull::new(map.as_mut_ptr()).ok_or(SlotError::BadRegion("null mapping"))?;
        Ok(Storage::Mapped { ptr, map })
    }

    fn base(&self) -> *mut u8 {
        match self {
            Storage::Heap { ptr, .. } | Storage::Mapped { ptr, .. } => ptr.as_ptr(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Heap { layout, .. } => layout.size(),
            Storage::Mapped { map, .. } => map.len(),
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Storage::Heap { ptr, layout } = self {
            unsafe { alloc::dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

/// One shared image slot over an owned region (heap or file mapping).
///
/// Create once per viewer instance; every handle mapping the same file sees
/// the same header words and pixel bytes.
#[derive(Debug)]
pub struct SharedImageSlot {
    storage: Storage,
    path: Option<PathBuf>,
}

// The region is shared raw memory; all access goes through atomics or the
// slot lock.
unsafe impl Send for SharedImageSlot {}
unsafe impl Sync for SharedImageSlot {}

impl SharedImageSlot {
    /// Creates a slot backed by an in-process allocation.
    ///
    /// Used by tests and by viewers embedded in the producer process; for a
    /// separate viewer process use [`SharedImageSlot::create_file`].
    pub fn create_in_memory(capacity: u32, dtype: Dtype) -> Result<Self, SlotError> {
        if capacity == 0 {
            return Err(SlotError::BadRegion("zero capacity"));
        }
        let len = region_len(capacity, dtype);
        let layout = Layout::from_size_align(len, 64).map_err(|_| SlotError::BadRegion("layout"))?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or(SlotError::BadRegion("allocation failed"))?;
        let slot = Self {
            storage: Storage::Heap { ptr, layout },
            path: None,
        };
        slot.init_header(capacity, dtype);
        Ok(slot)
    }

    /// Creates (or truncates) the slot file at `path` and maps it.
    pub fn create_file(path: &Path, capacity: u32, dtype: Dtype) -> Result<Self, SlotError> {
        if capacity == 0 {
            return Err(SlotError::BadRegion("zero capacity"));
        }
        let len = region_len(capacity, dtype);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        tracing::debug!(bytes = len, path = %path.display(), "slot: created mapping");
        let slot = Self {
            storage: Storage::from_map(map)?,
            path: Some(path.to_path_buf()),
        };
        slot.init_header(capacity, dtype);
        Ok(slot)
    }

    /// Maps an existing slot file created by [`SharedImageSlot::create_file`].
    ///
    /// Capacity and dtype are taken from the mapped header; the region is
    /// rejected when the magic, version, or size do not line up.
    pub fn open_file(path: &Path) -> Result<Self, SlotError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        if map.len() < HEADER_BYTES {
            return Err(SlotError::BadRegion("region smaller than header"));
        }
        let slot = Self {
            storage: Storage::from_map(map)?,
            path: Some(path.to_path_buf()),
        };
        let header = slot.header();
        if header.magic.load(Ordering::SeqCst) != SLOT_MAGIC {
            return Err(SlotError::BadRegion("bad magic"));
        }
        if header.version.load(Ordering::SeqCst) != SLOT_VERSION {
            return Err(SlotError::BadRegion("unsupported version"));
        }
        let dtype = Dtype::from_code(header.dtype.load(Ordering::SeqCst))
            .ok_or(SlotError::BadRegion("unknown dtype code"))?;
        let capacity = header.capacity.load(Ordering::SeqCst);
        if slot.storage.len() < region_len(capacity, dtype) {
            return Err(SlotError::BadRegion("region truncated"));
        }
        tracing::debug!(
            capacity,
            ?dtype,
            path = %path.display(),
            "slot: opened existing mapping"
        );
        Ok(slot)
    }

    fn init_header(&self, capacity: u32, dtype: Dtype) {
        let h = self.header();
        h.capacity.store(capacity, Ordering::SeqCst);
        h.dtype.store(dtype.code(), Ordering::SeqCst);
        h.version.store(SLOT_VERSION, Ordering::SeqCst);
        // Magic last: an opener that sees it can rely on the rest.
        h.magic.store(SLOT_MAGIC, Ordering::SeqCst);
    }

    fn header(&self) -> &SlotHeader {
        // The region is at least HEADER_BYTES long and 64-byte aligned
        // (heap: explicit Layout; mapping: page-aligned).
        unsafe { &*(self.storage.base() as *const SlotHeader) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // Pixel bytes follow the header.
        unsafe { self.storage.base().add(HEADER_BYTES) }
    }

    /// Path of the backing file, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn capacity(&self) -> u32 {
        self.header().capacity.load(Ordering::SeqCst)
    }

    pub fn dtype(&self) -> Dtype {
        // The code was validated at create/open time.
        Dtype::from_code(self.header().dtype.load(Ordering::SeqCst)).unwrap_or(Dtype::U8)
    }

    // ---------------------------------------------------------------------
    // Buffer lock
    // ---------------------------------------------------------------------

    fn lock(&self) -> LockGuard<'_> {
        let h = self.header();
        loop {
            if h.lock
                .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return LockGuard { slot: self };
            }
            std::hint::spin_loop();
        }
    }

    // ---------------------------------------------------------------------
    // Image payload
    // ---------------------------------------------------------------------

    /// Writes a canonical image into the slot.
    ///
    /// Fails before touching any shared state when the image does not fit
    /// the capacity or does not match the slot dtype. On success the shape
    /// words and pixel bytes are replaced under the lock and
    /// `has_new_image` is set.
    pub fn write(&self, image: &Image) -> Result<(), SlotError> {
        if image.dtype() != self.dtype() {
            return Err(SlotError::DtypeMismatch {
                expected: self.dtype(),
                actual: image.dtype(),
            });
        }
        let shape = image.shape();
        let samples = shape.sample_count();
        let capacity = self.capacity();
        if samples > capacity as u64 {
            return Err(SlotError::CapacityExceeded { samples, capacity });
        }

        let bytes = image.to_le_bytes();
        let h = self.header();
        let _guard = self.lock();
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr(), bytes.len());
        }
        h.height.store(shape.height, Ordering::SeqCst);
        h.width.store(shape.width, Ordering::SeqCst);
        h.channels.store(shape.channels, Ordering::SeqCst);
        h.has_new_image.store(1, Ordering::SeqCst);
        Ok(())
    }

    /// Copies out the current image if one arrived since the last read.
    ///
    /// Clears `has_new_image`, so two calls without an intervening write
    /// return `Some` at most once.
    pub fn read_if_new(&self) -> Option<Image> {
        let h = self.header();
        // Fast path: nothing new, don't touch the lock.
        if h.has_new_image.load(Ordering::SeqCst) == 0 {
            return None;
        }

        let (shape, bytes) = {
            let _guard = self.lock();
            if h.has_new_image.load(Ordering::SeqCst) == 0 {
                return None;
            }
            let shape = ImageShape::new(
                h.height.load(Ordering::SeqCst),
                h.width.load(Ordering::SeqCst),
                h.channels.load(Ordering::SeqCst),
            );
            let byte_len = shape.sample_count() as usize * self.dtype().sample_size();
            let mut bytes = vec![0u8; byte_len];
            unsafe {
                std::ptr::copy_nonoverlapping(self.data_ptr(), bytes.as_mut_ptr(), byte_len);
            }
            h.has_new_image.store(0, Ordering::SeqCst);
            (shape, bytes)
        };

        match Image::from_le_bytes(shape, self.dtype(), &bytes) {
            Ok(image) => Some(image),
            Err(err) => {
                // Only reachable through a corrupted mapping; writers
                // validate before publishing.
                tracing::warn!(%err, "slot: dropping undecodable image");
                None
            }
        }
    }

    /// Shape of the most recently written image (zeroes before any write).
    pub fn current_shape(&self) -> ImageShape {
        let h = self.header();
        let _guard = self.lock();
        ImageShape::new(
            h.height.load(Ordering::SeqCst),
            h.width.load(Ordering::SeqCst),
            h.channels.load(Ordering::SeqCst),
        )
    }

    /// True when an image has been written and not yet consumed.
    pub fn has_new_image(&self) -> bool {
        self.header().has_new_image.load(Ordering::SeqCst) != 0
    }

    // ---------------------------------------------------------------------
    // Scalar flags (no buffer lock)
    // ---------------------------------------------------------------------

    pub fn should_quit(&self) -> bool {
        self.header().should_quit.load(Ordering::SeqCst) != 0
    }

    pub fn set_should_quit(&self, value: bool) {
        self.header()
            .should_quit
            .store(value as u32, Ordering::SeqCst);
    }

    pub fn paused(&self) -> bool {
        self.header().paused.load(Ordering::SeqCst) != 0
    }

    pub fn set_paused(&self, value: bool) {
        self.header().paused.store(value as u32, Ordering::SeqCst);
    }

    pub fn hidden(&self) -> bool {
        self.header().hidden.load(Ordering::SeqCst) != 0
    }

    pub fn set_hidden(&self, value: bool) {
        self.header().hidden.store(value as u32, Ordering::SeqCst);
    }

    pub fn started(&self) -> bool {
        self.header().started.load(Ordering::SeqCst) != 0
    }

    pub fn set_started(&self, value: bool) {
        self.header().started.store(value as u32, Ordering::SeqCst);
    }

    /// Clears the one-shot coordination state before (re)starting a viewer
    /// process, so a viewer spawned after `close()` does not observe a
    /// stale quit request or consume a stale frame.
    pub fn reset_for_start(&self) {
        let h = self.header();
        h.started.store(0, Ordering::SeqCst);
        h.should_quit.store(0, Ordering::SeqCst);
        h.has_new_image.store(0, Ordering::SeqCst);
    }

    /// Current viewer window size, published by the viewer on resize.
    pub fn window_size(&self) -> (u32, u32) {
        let h = self.header();
        (
            h.window_width.load(Ordering::SeqCst),
            h.window_height.load(Ordering::SeqCst),
        )
    }

    pub fn set_window_size(&self, width: u32, height: u32) {
        let h = self.header();
        h.window_width.store(width, Ordering::SeqCst);
        h.window_height.store(height, Ordering::SeqCst);
    }
}

struct LockGuard<'a> {
    slot: &'a SharedImageSlot,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.slot.header().lock.store(0, Ordering::Release);
    }
}
