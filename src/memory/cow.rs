//! Sharing mapped pages between address spaces, and tearing them down again.

use log::{debug, trace};
use crate::memory::{
    Access, AddressSpace, FrameAllocator, FramePool, Page, PagingError, PhysicalMemory, RegionTable,
};

/// Maps every populated page of `regions` from `parent` into `child`.
///
/// Pages of shared regions keep their access in both spaces. Writable pages of private regions
/// become copy-on-write in both, so the first write on either side takes a private copy. Each
/// page mapped into the child adds one reference to its frame.
///
/// On error the child may hold some of the pages; release them with [`release_all`].
pub fn duplicate<P, C, A, M>(regions: &RegionTable, parent: &mut P, child: &mut C,
                             pool: &mut FramePool<'_, A, M>) -> Result<(), PagingError>
    where P: AddressSpace, C: AddressSpace, A: FrameAllocator, M: PhysicalMemory
{
    let mut shared = 0;
    for region in regions.iter() {
        for page in Page::range(region.start, region.end) {
            let translation = match parent.lookup(page) {
                Some(translation) if pool.refs().read(translation.frame) > 0 => translation,
                _ => continue,
            };
            let access = match translation.access {
                Access::Writable if !region.is_shared() => Access::CopyOnWrite,
                access => access,
            };
            child.map_to(page, translation.frame, access, pool.allocator_mut())?;
            pool.share(translation.frame);
            if access != translation.access {
                parent.set_access(page, access)?;
            }
            shared += 1;
        }
    }
    // parent entries may have lost write permission
    parent.reload();
    debug!("duplicated {} pages across {} mappings", shared, regions.len());
    Ok(())
}

/// Unmaps every page of every region and empties the table, returning the number of pages
/// unmapped. Frames go back to the allocator once no other address space maps them.
pub fn release_all<S, A, M>(regions: &mut RegionTable, space: &mut S,
                            pool: &mut FramePool<'_, A, M>) -> usize
    where S: AddressSpace, A: FrameAllocator, M: PhysicalMemory
{
    let mut unmapped = 0;
    for region in regions.drain() {
        for page in Page::range(region.start, region.end) {
            if let Some(translation) = space.unmap(page) {
                // stale entries point at frames that were already released
                if pool.refs().read(translation.frame) > 0 {
                    pool.release(translation.frame);
                }
                unmapped += 1;
            }
        }
        trace!("released {:#x}..{:#x}", region.start, region.end);
    }
    space.reload();
    unmapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{Machine, SimSpace};
    use crate::memory::{Backing, MapFlags, Region, PAGE_SIZE};

    const BASE: usize = 0x6000_0000;

    fn table(flags: MapFlags, pages: usize) -> RegionTable {
        let mut regions = RegionTable::new();
        regions.insert(Region::new(BASE, BASE + pages * PAGE_SIZE, flags, Backing::Anonymous)).unwrap();
        regions
    }

    fn page(i: usize) -> Page {
        Page::containing_address(BASE + i * PAGE_SIZE)
    }

    #[test]
    fn private_pages_become_copy_on_write_in_both_spaces() {
        let machine = Machine::new(16);
        let mut pool = machine.pool();
        let mut parent = SimSpace::new();
        let mut child = SimSpace::new();
        let regions = table(MapFlags::ANONYMOUS, 4);
        let frame = pool.alloc_zeroed().unwrap();
        parent.map_to(page(1), frame, Access::Writable, pool.allocator_mut()).unwrap();

        duplicate(&regions, &mut parent, &mut child, &mut pool).unwrap();

        assert_eq!(parent.lookup(page(1)).unwrap().access, Access::CopyOnWrite);
        assert_eq!(child.lookup(page(1)).unwrap().access, Access::CopyOnWrite);
        assert_eq!(child.lookup(page(1)).unwrap().frame, frame);
        assert_eq!(pool.refs().read(frame), 2);
        assert_eq!(child.mapped_pages(), 1);
        assert_eq!(parent.reloads(), 1);
    }

    #[test]
    fn shared_pages_stay_writable() {
        let machine = Machine::new(16);
        let mut pool = machine.pool();
        let mut parent = SimSpace::new();
        let mut child = SimSpace::new();
        let regions = table(MapFlags::SHARED | MapFlags::ANONYMOUS, 1);
        let frame = pool.alloc_zeroed().unwrap();
        parent.map_to(page(0), frame, Access::Writable, pool.allocator_mut()).unwrap();

        duplicate(&regions, &mut parent, &mut child, &mut pool).unwrap();

        assert_eq!(parent.lookup(page(0)).unwrap().access, Access::Writable);
        assert_eq!(child.lookup(page(0)).unwrap().access, Access::Writable);
        assert_eq!(pool.refs().read(frame), 2);
    }

    #[test]
    fn stale_entries_are_not_shared() {
        let machine = Machine::new(16);
        let mut pool = machine.pool();
        let mut parent = SimSpace::new();
        let mut child = SimSpace::new();
        let regions = table(MapFlags::ANONYMOUS, 1);
        let frame = pool.alloc_zeroed().unwrap();
        parent.map_to(page(0), frame, Access::Writable, pool.allocator_mut()).unwrap();
        pool.release(frame);

        duplicate(&regions, &mut parent, &mut child, &mut pool).unwrap();
        assert_eq!(child.mapped_pages(), 0);
        assert_eq!(pool.refs().read(frame), 0);
    }

    #[test]
    fn release_returns_frames_after_last_mapping() {
        let machine = Machine::new(16);
        let mut pool = machine.pool();
        let mut parent = SimSpace::new();
        let mut child = SimSpace::new();
        let mut regions = table(MapFlags::ANONYMOUS, 2);
        let frames = [pool.alloc_zeroed().unwrap(), pool.alloc_zeroed().unwrap()];
        for (i, &frame) in frames.iter().enumerate() {
            parent.map_to(page(i), frame, Access::Writable, pool.allocator_mut()).unwrap();
        }
        let mut child_regions = regions.clone();
        duplicate(&regions, &mut parent, &mut child, &mut pool).unwrap();

        assert_eq!(release_all(&mut child_regions, &mut child, &mut pool), 2);
        assert!(child_regions.is_empty());
        assert_eq!(child.mapped_pages(), 0);
        for &frame in frames.iter() {
            assert_eq!(pool.refs().read(frame), 1);
        }

        let in_use = pool.allocator_mut().in_use();
        assert_eq!(release_all(&mut regions, &mut parent, &mut pool), 2);
        assert_eq!(pool.allocator_mut().in_use(), in_use - 2);
        for &frame in frames.iter() {
            assert_eq!(pool.refs().read(frame), 0);
        }
    }

    #[test]
    fn child_page_table_exhaustion_is_reported() {
        // two data frames and the parent's table frame use all three
        let machine = Machine::new(3);
        let mut pool = machine.pool();
        let mut parent = SimSpace::new();
        let mut child = SimSpace::new();
        let regions = table(MapFlags::ANONYMOUS, 1);
        let frame = pool.alloc_zeroed().unwrap();
        parent.map_to(page(0), frame, Access::Writable, pool.allocator_mut()).unwrap();
        pool.alloc_zeroed().unwrap();

        assert_eq!(duplicate(&regions, &mut parent, &mut child, &mut pool),
                   Err(PagingError::OutOfFrames));
        assert_eq!(pool.refs().read(frame), 1);
        assert_eq!(parent.lookup(page(0)).unwrap().access, Access::Writable);
    }
}
