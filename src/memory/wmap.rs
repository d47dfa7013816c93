//! Reserving mappings.
//!
//! A reservation only records the range in the process's region table. Frames and page-table
//! entries are created later, one page at a time, by the fault handler.

use core::fmt;
use log::info;
use crate::file::{BackingFile, Fd, FileTable};
use crate::memory::map::{MMAP_BASE, MMAP_END};
use crate::memory::{
    is_page_aligned, page_round_up, Backing, MapFlags, Region, RegionTable, VirtualAddress,
};

/// Returned by the raw `wmap` entry point when a request is refused.
pub const MAP_FAILED: VirtualAddress = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    InvalidArgument(&'static str),
    /// Every mapping slot is in use.
    TableFull,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapError::InvalidArgument(reason) => write!(f, "invalid argument: {}", reason),
            MapError::TableFull => write!(f, "mapping table full"),
        }
    }
}

fn in_window(start: VirtualAddress, end: VirtualAddress) -> bool {
    start >= MMAP_BASE && end <= MMAP_END
}

/// Reserves a virtual range and returns its base address.
///
/// With `FIXED`, `address` is used as given and must be page-aligned; otherwise it is only a
/// hint. Without `ANONYMOUS`, `fd` must be an open, readable file. On error nothing is recorded.
pub fn reserve<T>(regions: &mut RegionTable, files: &T, address: VirtualAddress, length: usize,
                  flags: MapFlags, fd: Fd) -> Result<VirtualAddress, MapError>
    where T: FileTable
{
    if length == 0 {
        return Err(MapError::InvalidArgument("zero length"));
    }
    let size = page_round_up(length)
        .ok_or(MapError::InvalidArgument("length overflows"))?;

    let backing = if flags.contains(MapFlags::ANONYMOUS) {
        Backing::Anonymous
    } else {
        match files.get(fd) {
            Some(file) if file.readable() => Backing::File(fd),
            Some(_) => return Err(MapError::InvalidArgument("file not readable")),
            None => return Err(MapError::InvalidArgument("bad file descriptor")),
        }
    };

    let fixed = flags.contains(MapFlags::FIXED);
    if fixed {
        if !is_page_aligned(address) {
            return Err(MapError::InvalidArgument("fixed address not page-aligned"));
        }
        let end = address.checked_add(size)
            .ok_or(MapError::InvalidArgument("fixed range wraps"))?;
        if !in_window(address, end) {
            return Err(MapError::InvalidArgument("fixed range outside mapping window"));
        }
    }

    // a full table is reported before any placement check
    if regions.is_full() {
        return Err(MapError::TableFull);
    }

    let start = if fixed {
        if regions.overlaps_any(address, address + size) {
            return Err(MapError::InvalidArgument("fixed range overlaps a mapping"));
        }
        address
    } else {
        let hint_fits = is_page_aligned(address)
            && address.checked_add(size)
                .map_or(false, |end| in_window(address, end) && !regions.overlaps_any(address, end));
        if hint_fits {
            address
        } else {
            regions.first_fit(size, MMAP_BASE, MMAP_END)
                .ok_or(MapError::InvalidArgument("no room in mapping window"))?
        }
    };

    let region = Region::new(start, start + size, flags, backing);
    regions.insert(region)
        .map_err(|_| MapError::TableFull)?;
    info!("reserved {:#x}..{:#x} flags={:?} backing={:?}", region.start, region.end, flags, backing);
    Ok(start)
}
