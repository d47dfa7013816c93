use bit_field::BitField;
use log::error;
use spin::Mutex;
use static_assertions::const_assert;
use crate::memory::{PhysicalAddress, MAX_FRAMES};

/// The default page size.
///
/// 4K pages are the only size the mapping code deals in.
pub const PAGE_SIZE: usize = 4096;

const_assert!(PAGE_SIZE.is_power_of_two());

/// A physical memory frame that has been allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame {
    pub (in crate::memory) number: usize,
}

impl Frame {
    pub fn containing_address(addr: PhysicalAddress) -> Self {
        Frame { number: addr / PAGE_SIZE }
    }

    pub const fn from_number(number: usize) -> Self {
        Frame { number }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn start_address(&self) -> PhysicalAddress {
        self.number * PAGE_SIZE
    }
}

pub trait FrameAllocator {
    fn alloc(&mut self) -> Option<Frame>;
    fn dealloc(&mut self, frame: Frame);
}

/// Lets every processor share one allocator.
impl<A> FrameAllocator for &Mutex<A>
    where A: FrameAllocator
{
    fn alloc(&mut self) -> Option<Frame> {
        self.lock().alloc()
    }

    fn dealloc(&mut self, frame: Frame) {
        self.lock().dealloc(frame)
    }
}

/// Byte-level access to physical frames.
pub trait PhysicalMemory {
    fn frame(&self, frame: Frame) -> &[u8; PAGE_SIZE];
    fn frame_mut(&mut self, frame: Frame) -> &mut [u8; PAGE_SIZE];

    fn zero(&mut self, frame: Frame) {
        self.frame_mut(frame).fill(0);
    }

    /// Copies the whole of `src` over `dst`.
    fn copy(&mut self, src: Frame, dst: Frame) {
        let contents = *self.frame(src);
        self.frame_mut(dst).copy_from_slice(&contents);
    }
}

/// Physical memory seen through the kernel's linear mapping of all RAM.
pub struct DirectMap {
    offset: usize,
}

impl DirectMap {
    /// # Safety
    /// Every frame the caller touches must be mapped writable at `offset + frame address`.
    pub const unsafe fn new(offset: usize) -> Self {
        DirectMap { offset }
    }

    fn address_of(&self, frame: Frame) -> usize {
        self.offset + frame.start_address()
    }
}

impl PhysicalMemory for DirectMap {
    fn frame(&self, frame: Frame) -> &[u8; PAGE_SIZE] {
        unsafe { &*(self.address_of(frame) as *const [u8; PAGE_SIZE]) }
    }

    fn frame_mut(&mut self, frame: Frame) -> &mut [u8; PAGE_SIZE] {
        unsafe { &mut *(self.address_of(frame) as *mut [u8; PAGE_SIZE]) }
    }

    fn copy(&mut self, src: Frame, dst: Frame) {
        assert_ne!(src, dst, "Attempted to copy a frame onto itself");
        unsafe {
            core::ptr::copy_nonoverlapping(self.address_of(src) as *const u8,
                                           self.address_of(dst) as *mut u8, PAGE_SIZE);
        }
    }
}

/// A contiguous run of usable physical memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryArea {
    pub start: PhysicalAddress,
    pub size: usize,
}

impl MemoryArea {
    fn last_frame(&self) -> Frame {
        Frame::containing_address(self.start + self.size - 1)
    }
}

/// Words in the released-frame bitmap, one bit per frame below `PHYS_TOP`.
const RELEASED_WORDS: usize = MAX_FRAMES / 64;

const_assert!(MAX_FRAMES % 64 == 0);

/// A simple frame allocator.
///
/// Fresh frames are handed out in address order from the usable areas, skipping the kernel
/// image. Released frames are marked in a bitmap and handed out first, lowest frame first.
pub struct AreaFrameAllocator<'a> {
    next_frame: Frame,
    current_area: Option<&'a MemoryArea>,
    areas: &'a [MemoryArea],
    kernel_start: Frame,
    kernel_end: Frame,
    released: [u64; RELEASED_WORDS],
    released_count: usize,
}

impl<'a> AreaFrameAllocator<'a> {
    pub fn new(areas: &'a [MemoryArea], kernel_start: PhysicalAddress, kernel_end: PhysicalAddress)
        -> Self
    {
        let mut alloc = AreaFrameAllocator {
            next_frame: Frame { number: 0 },
            current_area: None,
            areas,
            kernel_start: Frame::containing_address(kernel_start),
            kernel_end: Frame::containing_address(kernel_end),
            released: [0; RELEASED_WORDS],
            released_count: 0,
        };
        alloc.choose_next_area();
        alloc
    }

    fn choose_next_area(&mut self) {
        self.current_area = self.areas.iter()
            .filter(|area| area.size > 0 && area.last_frame() >= self.next_frame)
            .min_by_key(|area| area.start);
        if let Some(area) = self.current_area {
            let area_start_frame = Frame::containing_address(area.start);
            if self.next_frame < area_start_frame {
                self.next_frame = area_start_frame;
            }
        }
    }

    fn pop_released(&mut self) -> Option<Frame> {
        if self.released_count == 0 {
            return None;
        }
        let (index, word) = self.released.iter_mut()
            .enumerate()
            .find(|(_, word)| **word != 0)?;
        let bit = word.trailing_zeros() as usize;
        word.set_bit(bit, false);
        self.released_count -= 1;
        Some(Frame { number: index * 64 + bit })
    }
}

impl<'a> FrameAllocator for AreaFrameAllocator<'a> {
    fn alloc(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pop_released() {
            return Some(frame);
        }
        loop {
            let area = self.current_area?;
            let frame = self.next_frame;

            if frame > area.last_frame() {
                // this area is used up, so advance
                self.choose_next_area();
            } else if frame >= self.kernel_start && frame <= self.kernel_end {
                self.next_frame = Frame { number: self.kernel_end.number + 1 };
            } else {
                self.next_frame.number += 1;
                return Some(frame);
            }
        }
    }

    fn dealloc(&mut self, frame: Frame) {
        assert!(frame.number < MAX_FRAMES,
            "Released frame {:#x} is above the top of physical memory", frame.start_address());
        let word = &mut self.released[frame.number / 64];
        let bit = frame.number % 64;
        if word.get_bit(bit) {
            error!("frame {:#x} released twice", frame.start_address());
            return;
        }
        word.set_bit(bit, true);
        self.released_count += 1;
    }
}
