use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use crate::arch::x86_64 as arch;
use crate::memory::{Frame, FrameAllocator};
use super::{
    AddressSpace, Access, Entry, EntryFlags, Page, PagingError, Table,
    TableLevel1, TableLevel4, Translation, P4,
};

pub struct Mapper {
    p4: NonNull<Table<TableLevel4>>,
}

impl Mapper {
    pub unsafe fn new() -> Self {
        Mapper {
            p4: NonNull::new_unchecked(P4),
        }
    }

    /// Gets a reference to the top-level page table.
    pub (in crate::memory) fn p4(&self) -> &Table<TableLevel4> {
        unsafe { self.p4.as_ref() }
    }

    /// Gets the top-level page table mutably.
    pub (in crate::memory) fn p4_mut(&mut self) -> &mut Table<TableLevel4> {
        unsafe { self.p4.as_mut() }
    }

    fn p1(&self, page: Page) -> Option<&Table<TableLevel1>> {
        self.p4()
            .next_table(page.p4_index())
            .and_then(|p3| p3.next_table(page.p3_index()))
            .and_then(|p2| p2.next_table(page.p2_index()))
    }

    fn p1_mut(&mut self, page: Page) -> Option<&mut Table<TableLevel1>> {
        self.p4_mut()
            .next_table_mut(page.p4_index())
            .and_then(|p3| p3.next_table_mut(page.p3_index()))
            .and_then(|p2| p2.next_table_mut(page.p2_index()))
    }

    /// Gets the leaf entry of a page, if it is both present and user-accessible.
    fn user_entry_mut(&mut self, page: Page) -> Result<&mut Entry, PagingError> {
        self.p1_mut(page)
            .map(|p1| &mut p1[page.p1_index()])
            .filter(|entry| entry.flags().contains(EntryFlags::PRESENT | EntryFlags::USER))
            .ok_or(PagingError::NotMapped)
    }

    /// Maps a page to a given frame.
    pub fn map_to<A>(&mut self, page: Page, frame: Frame, flags: EntryFlags, allocator: &mut A)
        -> Result<(), PagingError>
        where A: FrameAllocator
    {
        let p4 = self.p4_mut();
        let p3 = p4.next_table_create(page.p4_index(), allocator)?;
        let p2 = p3.next_table_create(page.p3_index(), allocator)?;
        let p1 = p2.next_table_create(page.p2_index(), allocator)?;

        if p1[page.p1_index()].is_used() {
            return Err(PagingError::AlreadyMapped);
        }
        p1[page.p1_index()].set(frame, flags | EntryFlags::PRESENT);
        Ok(())
    }
}

/// The page tables currently loaded in CR3, reached through the recursive P4 slot.
pub struct ActivePageTable {
    mapper: Mapper,
}

impl Deref for ActivePageTable {
    type Target = Mapper;

    fn deref(&self) -> &Self::Target {
        &self.mapper
    }
}

impl DerefMut for ActivePageTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.mapper
    }
}

impl ActivePageTable {
    /// # Safety
    /// The loaded P4 table must map itself in its last entry, and only one `ActivePageTable` may
    /// exist per processor.
    pub unsafe fn new() -> Self {
        ActivePageTable {
            mapper: Mapper::new(),
        }
    }
}

impl AddressSpace for ActivePageTable {
    fn lookup(&self, page: Page) -> Option<Translation> {
        let entry = &self.p1(page)?[page.p1_index()];
        if !entry.flags().contains(EntryFlags::USER) {
            return None;
        }
        Some(Translation {
            frame: entry.to_frame()?,
            access: entry.access()?,
        })
    }

    fn map_to<A>(&mut self, page: Page, frame: Frame, access: Access, allocator: &mut A)
        -> Result<(), PagingError>
        where A: FrameAllocator
    {
        self.mapper.map_to(page, frame, EntryFlags::from(access), allocator)
    }

    fn remap(&mut self, page: Page, frame: Frame, access: Access) -> Result<(), PagingError> {
        self.user_entry_mut(page)?.set(frame, EntryFlags::from(access));
        arch::flush_page(page.start_address());
        Ok(())
    }

    fn set_access(&mut self, page: Page, access: Access) -> Result<(), PagingError> {
        self.user_entry_mut(page)?.set_flags(EntryFlags::from(access));
        arch::flush_page(page.start_address());
        Ok(())
    }

    fn unmap(&mut self, page: Page) -> Option<Translation> {
        let translation = self.lookup(page)?;
        self.user_entry_mut(page).ok()?.set_unused();
        arch::flush_page(page.start_address());
        Some(translation)
    }

    fn reload(&mut self) {
        arch::reload_address_space();
    }
}
