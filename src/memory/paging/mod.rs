use core::fmt;
use core::ops::Add;
use crate::memory::{Frame, FrameAllocator, PAGE_SIZE};

mod entry;
mod table;
#[cfg(target_arch = "x86_64")]
mod mapper;

pub use self::entry::*;
pub use self::table::*;
#[cfg(target_arch = "x86_64")]
pub use self::mapper::{ActivePageTable, Mapper};

pub type PhysicalAddress = usize;
pub type VirtualAddress = usize;

/// Whether an address lies in the lower or upper half of the 48-bit address space.
pub fn is_canonical(address: VirtualAddress) -> bool {
    address < 0x0000_8000_0000_0000 || address >= 0xffff_8000_0000_0000
}

/// A virtual page of memory that maps to a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page {
    number: usize,
}

impl Page {
    /// Pages covering `[start, end)`.
    pub fn range(start: VirtualAddress, end: VirtualAddress) -> PageRangeIter {
        PageRangeIter { start: start / PAGE_SIZE, end: (end / PAGE_SIZE).wrapping_sub(1) }
    }

    pub fn containing_address(address: VirtualAddress) -> Self {
        assert!(is_canonical(address),
                "invalid address passed to Page::containing_address: 0x{:x}", address);
        Page { number: address / PAGE_SIZE }
    }

    /// Like `containing_address`, but `None` for addresses outside the canonical halves.
    pub fn try_containing_address(address: VirtualAddress) -> Option<Self> {
        if is_canonical(address) {
            Some(Page { number: address / PAGE_SIZE })
        } else {
            None
        }
    }

    pub fn start_address(&self) -> usize {
        self.number * PAGE_SIZE
    }

    pub fn p4_index(&self) -> usize {
        (self.number >> 27) & 0o777
    }

    pub fn p3_index(&self) -> usize {
        (self.number >> 18) & 0o777
    }

    pub fn p2_index(&self) -> usize {
        (self.number >> 9) & 0o777
    }

    pub fn p1_index(&self) -> usize {
        self.number & 0o777
    }
}

impl Add<usize> for Page {
    type Output = Page;

    fn add(self, rhs: usize) -> Page {
        Page { number: self.number + rhs }
    }
}

#[derive(Debug, Clone)]
pub struct PageRangeIter {
    start: usize,
    end: usize,
}

impl Iterator for PageRangeIter {
    type Item = Page;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start > self.end || self.end == usize::MAX {
            None
        } else {
            let page = Page { number: self.start };
            self.start += 1;
            Some(page)
        }
    }
}

/// How a user page may be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Writable,
    /// Readable; the first write faults so the frame can be duplicated or claimed.
    CopyOnWrite,
}

/// A present user translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub frame: Frame,
    pub access: Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// An intermediate page table could not be allocated.
    OutOfFrames,
    AlreadyMapped,
    NotMapped,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PagingError::OutOfFrames => write!(f, "out of frames for page tables"),
            PagingError::AlreadyMapped => write!(f, "page already mapped"),
            PagingError::NotMapped => write!(f, "page not mapped"),
        }
    }
}

/// The operations the mapping code needs from a process's page tables.
///
/// Implementors keep the raw entry format to themselves; callers only ever see frames and
/// `Access` values.
pub trait AddressSpace {
    /// Gets the translation for a page, if its entry is present.
    fn lookup(&self, page: Page) -> Option<Translation>;

    /// Maps an unmapped page to a frame. Missing intermediate tables come from `allocator`.
    fn map_to<A>(&mut self, page: Page, frame: Frame, access: Access, allocator: &mut A)
        -> Result<(), PagingError>
        where A: FrameAllocator;

    /// Points a mapped page at a different frame.
    fn remap(&mut self, page: Page, frame: Frame, access: Access) -> Result<(), PagingError>;

    /// Changes the access of a mapped page in place.
    fn set_access(&mut self, page: Page, access: Access) -> Result<(), PagingError>;

    /// Clears a page's entry, returning what it translated to. The frame is left alone.
    fn unmap(&mut self, page: Page) -> Option<Translation>;

    /// Reloads the address-space root so every stale translation is dropped.
    fn reload(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_half_open_intervals() {
        let pages: Vec<_> = Page::range(0x6000_0000, 0x6000_3000)
            .map(|page| page.start_address())
            .collect();
        assert_eq!(pages, vec![0x6000_0000, 0x6000_1000, 0x6000_2000]);
        assert_eq!(Page::range(0, 0).count(), 0);
    }

    #[test]
    fn table_indexes() {
        let page = Page::containing_address(0x6000_1000);
        assert_eq!(page.p4_index(), 0);
        assert_eq!(page.p3_index(), 1);
        assert_eq!(page.p2_index(), 256);
        assert_eq!(page.p1_index(), 1);
        assert_eq!((page + 1).start_address(), 0x6000_2000);
    }

    #[test]
    fn non_canonical_addresses_have_no_page() {
        assert!(Page::try_containing_address(0x0000_8000_0000_0000).is_none());
        assert_eq!(Page::try_containing_address(0xffff_8000_0000_1000).map(|p| p.p1_index()), Some(1));
    }
}
