//! Frame reference counting.
//!
//! Every page-table entry that translates to a frame holds one reference to it. A count of one
//! means the mapping owns the frame outright; anything higher means a write has to copy first.

use core::sync::atomic::{AtomicU32, Ordering};
use crate::memory::{map::PHYS_TOP, Frame, PAGE_SIZE};

/// Number of frames the kernel's reference table covers.
pub const MAX_FRAMES: usize = PHYS_TOP / PAGE_SIZE;

const UNREFERENCED: AtomicU32 = AtomicU32::new(0);
static FRAME_COUNTS: [AtomicU32; MAX_FRAMES] = [UNREFERENCED; MAX_FRAMES];

/// The reference table for all of physical memory.
pub static FRAME_REFS: FrameRefTable<'static> = FrameRefTable::new(&FRAME_COUNTS);

/// One counter per physical frame, indexed by frame number.
///
/// Counters are atomic, so the table can be shared by every processor without a lock.
#[derive(Clone, Copy)]
pub struct FrameRefTable<'a> {
    counts: &'a [AtomicU32],
}

impl<'a> FrameRefTable<'a> {
    pub const fn new(counts: &'a [AtomicU32]) -> Self {
        FrameRefTable { counts }
    }

    /// Number of frames covered by this table.
    pub fn capacity(&self) -> usize {
        self.counts.len()
    }

    fn counter(&self, frame: Frame) -> &AtomicU32 {
        assert!(frame.number < self.counts.len(),
            "Frame {:#x} is outside the reference table", frame.start_address());
        &self.counts[frame.number]
    }

    /// Gets the number of live mappings of a frame.
    pub fn read(&self, frame: Frame) -> u32 {
        self.counter(frame).load(Ordering::Acquire)
    }

    /// Adds a reference, returning the new count.
    pub fn increment(&self, frame: Frame) -> u32 {
        self.counter(frame).fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops a reference, returning the new count.
    ///
    /// An unreferenced frame is left at zero and `None` is returned.
    pub fn decrement(&self, frame: Frame) -> Option<u32> {
        self.counter(frame)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }
}
