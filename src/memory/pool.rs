use log::error;
use crate::memory::{Frame, FrameAllocator, FrameRefTable, PhysicalMemory, PAGE_SIZE};

/// Frames as the mapping code sees them: allocated, counted, and addressable.
///
/// Every frame handed out by the pool starts with one reference, and a frame only goes back to
/// the allocator once its last reference is released.
pub struct FramePool<'r, A, M> {
    allocator: A,
    memory: M,
    refs: FrameRefTable<'r>,
}

impl<'r, A, M> FramePool<'r, A, M>
    where A: FrameAllocator, M: PhysicalMemory
{
    pub fn new(allocator: A, memory: M, refs: FrameRefTable<'r>) -> Self {
        FramePool { allocator, memory, refs }
    }

    pub fn refs(&self) -> FrameRefTable<'r> {
        self.refs
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    /// Allocates a zero-filled frame holding a single reference.
    pub fn alloc_zeroed(&mut self) -> Option<Frame> {
        let frame = self.allocator.alloc()?;
        self.memory.zero(frame);
        let count = self.refs.increment(frame);
        if count != 1 {
            error!("freshly allocated frame {:#x} already had {} references",
                frame.start_address(), count - 1);
        }
        Some(frame)
    }

    /// Allocates a frame holding a single reference, filled with a copy of `src`.
    pub fn alloc_copy(&mut self, src: Frame) -> Option<Frame> {
        let frame = self.allocator.alloc()?;
        self.memory.copy(src, frame);
        self.refs.increment(frame);
        Some(frame)
    }

    /// Records another mapping of an existing frame.
    pub fn share(&mut self, frame: Frame) -> u32 {
        self.refs.increment(frame)
    }

    /// Drops one mapping of a frame, returning the frame to the allocator with the last one.
    pub fn release(&mut self, frame: Frame) {
        match self.refs.decrement(frame) {
            Some(0) => self.allocator.dealloc(frame),
            Some(_) => {},
            None => error!("released unreferenced frame {:#x}", frame.start_address()),
        }
    }

    pub fn bytes(&self, frame: Frame) -> &[u8; PAGE_SIZE] {
        self.memory.frame(frame)
    }

    pub fn bytes_mut(&mut self, frame: Frame) -> &mut [u8; PAGE_SIZE] {
        self.memory.frame_mut(frame)
    }
}
