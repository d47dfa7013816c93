//! Page fault resolution.
//!
//! A user page fault ends in one of two places: the faulting page is made usable and the
//! instruction is retried, or the fault is reported as fatal and the caller kills the process.
//!
//! 1. A present entry whose frame has no references left is stale and is dropped before anything
//!    else is looked at; the fault continues as if the page were unmapped.
//! 2. A present copy-on-write entry is made writable in place when this mapping is the frame's
//!    only reference, and is moved to a private copy of the frame otherwise.
//! 3. Any other present entry faulting is a protection violation.
//! 4. An unmapped page inside a reserved region gets a fresh zeroed frame, filled from the
//!    backing file when the region has one.
//! 5. Everything else is a segmentation fault.

use core::fmt;
use log::{debug, error, warn};
use crate::file::FileTable;
use crate::memory::{
    load_page, page_round_down, Access, AddressSpace, Backing, FrameAllocator, FramePool, Page,
    PagingError, PhysicalMemory, RegionTable, Translation, VirtualAddress,
};

/// How a fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Sole owner of a copy-on-write frame; the entry was made writable.
    WriteEnabled,
    /// Shared copy-on-write frame; the page now has a private copy.
    Copied,
    /// First touch of an anonymous page.
    ZeroFilled,
    /// First touch of a file-backed page.
    FileFilled,
}

/// Why a fault could not be resolved. Every variant is fatal to the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The address is outside every mapping, or the access is not allowed.
    SegmentationFault,
    /// No frame was available for the page or its page tables.
    AllocationFailure,
    /// The backing file could not be read.
    BackingIo,
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FaultError::SegmentationFault => write!(f, "segmentation fault"),
            FaultError::AllocationFailure => write!(f, "out of memory"),
            FaultError::BackingIo => write!(f, "backing file read failed"),
        }
    }
}

impl From<PagingError> for FaultError {
    fn from(error: PagingError) -> Self {
        match error {
            PagingError::OutOfFrames => FaultError::AllocationFailure,
            PagingError::AlreadyMapped | PagingError::NotMapped => FaultError::SegmentationFault,
        }
    }
}

/// Resolves a page fault at `address` in the given process state.
pub fn resolve<S, T, A, M>(address: VirtualAddress, space: &mut S, regions: &mut RegionTable,
                           files: &mut T, pool: &mut FramePool<'_, A, M>)
    -> Result<Resolution, FaultError>
    where S: AddressSpace, T: FileTable, A: FrameAllocator, M: PhysicalMemory
{
    let page = match Page::try_containing_address(page_round_down(address)) {
        Some(page) => page,
        None => {
            warn!("fault on non-canonical address {:#x}", address);
            return Err(FaultError::SegmentationFault);
        },
    };

    if let Some(translation) = space.lookup(page) {
        let count = pool.refs().read(translation.frame);
        if count > 0 {
            return present_fault(page, translation, count, space, pool);
        }
        debug!("stale entry {:#x} -> {:#x}, treating page as unmapped",
            page.start_address(), translation.frame.start_address());
        space.unmap(page);
    }
    populate(page, space, regions, files, pool)
}

fn present_fault<S, A, M>(page: Page, translation: Translation, count: u32, space: &mut S,
                          pool: &mut FramePool<'_, A, M>) -> Result<Resolution, FaultError>
    where S: AddressSpace, A: FrameAllocator, M: PhysicalMemory
{
    if translation.access != Access::CopyOnWrite {
        warn!("protection fault at {:#x} ({:?} page)", page.start_address(), translation.access);
        return Err(FaultError::SegmentationFault);
    }

    if count == 1 {
        space.set_access(page, Access::Writable)?;
        debug!("{:#x}: sole owner of {:#x}, write enabled",
            page.start_address(), translation.frame.start_address());
        return Ok(Resolution::WriteEnabled);
    }

    let old = translation.frame;
    let new = match pool.alloc_copy(old) {
        Some(frame) => frame,
        None => {
            error!("{:#x}: no frame for copy-on-write copy", page.start_address());
            return Err(FaultError::AllocationFailure);
        },
    };
    if let Err(e) = space.remap(page, new, Access::Writable) {
        pool.release(new);
        return Err(e.into());
    }
    pool.release(old);
    space.reload();
    debug!("{:#x}: copied shared frame {:#x} ({} refs) to {:#x}",
        page.start_address(), old.start_address(), count, new.start_address());
    Ok(Resolution::Copied)
}

fn populate<S, T, A, M>(page: Page, space: &mut S, regions: &mut RegionTable, files: &mut T,
                        pool: &mut FramePool<'_, A, M>) -> Result<Resolution, FaultError>
    where S: AddressSpace, T: FileTable, A: FrameAllocator, M: PhysicalMemory
{
    let address = page.start_address();
    let region = match regions.find_mut(address) {
        Some(region) => region,
        None => {
            warn!("fault at {:#x} outside every mapping", address);
            return Err(FaultError::SegmentationFault);
        },
    };

    let frame = match pool.alloc_zeroed() {
        Some(frame) => frame,
        None => {
            error!("{:#x}: no frame for first touch", address);
            return Err(FaultError::AllocationFailure);
        },
    };

    // fill before mapping so the page is never visible half-loaded
    let resolution = match region.backing {
        Backing::Anonymous => Resolution::ZeroFilled,
        Backing::File(fd) => {
            let offset = address - region.start;
            let loaded = match files.get_mut(fd) {
                Some(file) => load_page(file, offset, pool.bytes_mut(frame)),
                None => {
                    warn!("{:#x}: backing descriptor {} is closed", address, fd);
                    pool.release(frame);
                    return Err(FaultError::BackingIo);
                },
            };
            if let Err(e) = loaded {
                warn!("{:#x}: reading fd {} at offset {:#x}: {}", address, fd, offset, e);
                pool.release(frame);
                return Err(FaultError::BackingIo);
            }
            Resolution::FileFilled
        },
    };

    if let Err(e) = space.map_to(page, frame, Access::Writable, pool.allocator_mut()) {
        error!("{:#x}: mapping new frame: {}", address, e);
        pool.release(frame);
        return Err(e.into());
    }
    region.loaded_pages += 1;
    debug!("{:#x}: {:?} into {:#x}", address, resolution, frame.start_address());
    Ok(resolution)
}

/// Per-process fault counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub total: u64,
    pub write_enabled: u64,
    pub copied: u64,
    pub zero_filled: u64,
    pub file_filled: u64,
    pub failures: u64,
}

impl FaultStats {
    pub fn record(&mut self, outcome: &Result<Resolution, FaultError>) {
        self.total += 1;
        match outcome {
            Ok(Resolution::WriteEnabled) => self.write_enabled += 1,
            Ok(Resolution::Copied) => self.copied += 1,
            Ok(Resolution::ZeroFilled) => self.zero_filled += 1,
            Ok(Resolution::FileFilled) => self.file_filled += 1,
            Err(_) => self.failures += 1,
        }
    }
}
