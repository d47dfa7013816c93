//! Per-process table of reserved mappings.

use bitflags::bitflags;
use crate::file::Fd;
use crate::memory::VirtualAddress;

/// Most mappings a single process may hold at once.
pub const MAX_REGIONS: usize = 16;

bitflags! {
    /// `wmap` flags. The bit values are shared with user space and must not change.
    pub struct MapFlags: u32 {
        /// Writes are visible to every address space the mapping is shared with.
        const SHARED    = 0x0002;
        /// Zero-filled, not backed by a file.
        const ANONYMOUS = 0x0004;
        /// Place the mapping exactly at the requested address.
        const FIXED     = 0x0008;
    }
}

/// What fills a page of a mapping on first touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Anonymous,
    File(Fd),
}

/// One reserved range of a process's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub flags: MapFlags,
    pub backing: Backing,
    /// Pages populated by the fault handler so far.
    pub loaded_pages: usize,
}

impl Region {
    pub fn new(start: VirtualAddress, end: VirtualAddress, flags: MapFlags, backing: Backing) -> Self {
        assert!(start < end, "empty region {:#x}..{:#x}", start, end);
        Region { start, end, flags, backing, loaded_pages: 0 }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, address: VirtualAddress) -> bool {
        address >= self.start && address < self.end
    }

    /// Whether this region intersects `[start, end)`.
    pub fn overlaps(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        start < self.end && self.start < end
    }

    pub fn is_shared(&self) -> bool {
        self.flags.contains(MapFlags::SHARED)
    }
}

/// Snapshot of a process's mappings, laid out the way `getwmapinfo` hands it to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct MapInfo {
    pub total_mmaps: usize,
    pub addr: [VirtualAddress; MAX_REGIONS],
    pub length: [usize; MAX_REGIONS],
    pub n_loaded_pages: [usize; MAX_REGIONS],
}

/// A fixed number of mapping slots.
#[derive(Debug, Clone)]
pub struct RegionTable {
    slots: [Option<Region>; MAX_REGIONS],
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionTable {
    pub const fn new() -> Self {
        RegionTable { slots: [None; MAX_REGIONS] }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.slots.iter().flatten()
    }

    /// Finds the region covering an address.
    pub fn find(&self, address: VirtualAddress) -> Option<&Region> {
        self.iter().find(|region| region.contains(address))
    }

    pub fn find_mut(&mut self, address: VirtualAddress) -> Option<&mut Region> {
        self.slots.iter_mut()
            .flatten()
            .find(|region| region.contains(address))
    }

    pub fn overlaps_any(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        self.iter().any(|region| region.overlaps(start, end))
    }

    /// Stores a region in the first free slot, handing it back if the table is full.
    pub fn insert(&mut self, region: Region) -> Result<usize, Region> {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(region);
                Ok(slot)
            },
            None => Err(region),
        }
    }

    /// Lowest address in `[low, high)` where `length` bytes fit between existing regions.
    pub fn first_fit(&self, length: usize, low: VirtualAddress, high: VirtualAddress)
        -> Option<VirtualAddress>
    {
        let mut candidate = low;
        loop {
            let end = candidate.checked_add(length)?;
            if end > high {
                return None;
            }
            // jump past whichever region is in the way, or take the gap
            match self.iter().filter(|region| region.overlaps(candidate, end)).map(|region| region.end).max() {
                Some(blocked_until) => candidate = blocked_until,
                None => return Some(candidate),
            }
        }
    }

    /// Empties the table, yielding every region that was live.
    pub fn drain(&mut self) -> impl Iterator<Item = Region> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }

    pub fn info(&self) -> MapInfo {
        let mut info = MapInfo {
            total_mmaps: 0,
            addr: [0; MAX_REGIONS],
            length: [0; MAX_REGIONS],
            n_loaded_pages: [0; MAX_REGIONS],
        };
        for (i, region) in self.iter().enumerate() {
            info.addr[i] = region.start;
            info.length[i] = region.len();
            info.n_loaded_pages[i] = region.loaded_pages;
            info.total_mmaps += 1;
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    fn anon(start: usize, pages: usize) -> Region {
        Region::new(start, start + pages * PAGE_SIZE, MapFlags::ANONYMOUS, Backing::Anonymous)
    }

    #[test]
    fn lookup_by_address() {
        let mut table = RegionTable::new();
        table.insert(anon(0x6000_0000, 2)).unwrap();
        table.insert(anon(0x6001_0000, 1)).unwrap();
        assert_eq!(table.find(0x6000_1fff).map(|r| r.start), Some(0x6000_0000));
        assert_eq!(table.find(0x6001_0000).map(|r| r.start), Some(0x6001_0000));
        assert!(table.find(0x6000_2000).is_none());
        assert!(table.find(0x5fff_ffff).is_none());
    }

    #[test]
    fn full_table_hands_region_back() {
        let mut table = RegionTable::new();
        for i in 0..MAX_REGIONS {
            assert_eq!(table.insert(anon(0x6000_0000 + i * PAGE_SIZE, 1)), Ok(i));
        }
        assert!(table.is_full());
        let extra = anon(0x7000_0000, 1);
        assert_eq!(table.insert(extra), Err(extra));
        assert_eq!(table.len(), MAX_REGIONS);
    }

    #[test]
    fn first_fit_skips_occupied_ranges() {
        let mut table = RegionTable::new();
        table.insert(anon(0x6000_0000, 2)).unwrap();
        table.insert(anon(0x6000_3000, 1)).unwrap();
        assert_eq!(table.first_fit(PAGE_SIZE, 0x6000_0000, 0x8000_0000), Some(0x6000_2000));
        assert_eq!(table.first_fit(2 * PAGE_SIZE, 0x6000_0000, 0x8000_0000), Some(0x6000_4000));
        assert_eq!(table.first_fit(PAGE_SIZE, 0x6000_0000, 0x6000_2000), None);
    }

    #[test]
    fn info_lists_live_regions() {
        let mut table = RegionTable::new();
        let mut region = anon(0x6000_0000, 3);
        region.loaded_pages = 2;
        table.insert(region).unwrap();
        let info = table.info();
        assert_eq!(info.total_mmaps, 1);
        assert_eq!(info.addr[0], 0x6000_0000);
        assert_eq!(info.length[0], 3 * PAGE_SIZE);
        assert_eq!(info.n_loaded_pages[0], 2);
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = RegionTable::new();
        table.insert(anon(0x6000_0000, 1)).unwrap();
        table.insert(anon(0x6000_1000, 1)).unwrap();
        assert_eq!(table.drain().count(), 2);
        assert!(table.is_empty());
    }
}
