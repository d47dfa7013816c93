use core::ops::{Index, IndexMut};
use core::marker::PhantomData;
use crate::memory::{FrameAllocator, PAGE_SIZE};
use super::{Entry, EntryFlags, PagingError};

/// The number of page entries per page table.
pub (in crate::memory) const ENTRY_COUNT: usize = 512;

/// A level of the four-level page table tree.
pub trait TableLevel {}

/// A level whose entries point at further tables instead of pages.
pub trait ParentLevel: TableLevel {
    type Child: TableLevel;
}

macro_rules! table_levels {
    ($($level:ident $(=> $child:ident)?;)*) => {
        $(
            pub enum $level {}

            impl TableLevel for $level {}

            $(impl ParentLevel for $level {
                type Child = $child;
            })?
        )*
    };
}

table_levels! {
    TableLevel4 => TableLevel3;
    TableLevel3 => TableLevel2;
    TableLevel2 => TableLevel1;
    TableLevel1;
}

/// Flags for an entry that points at a lower-level table.
///
/// User access is granted all the way down; the leaf entry decides what a page allows.
const INTERMEDIATE: EntryFlags = EntryFlags::from_bits_truncate(
    EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits() | EntryFlags::USER.bits());

/// Where the child table behind `index` of the table at `table_address` is visible.
///
/// With the root mapped into its own last slot, shifting a table's address up by one level and
/// filling in the index lands on the table that entry points at.
pub (in crate::memory) fn child_table_address(table_address: usize, index: usize) -> usize {
    (table_address << 9) | (index * PAGE_SIZE)
}

/// A page table.
#[repr(C, align(4096))]
pub struct Table<L>
    where L: TableLevel
{
    entries: [Entry; ENTRY_COUNT],
    _level: PhantomData<L>,
}

impl<L> Table<L>
    where L: TableLevel
{
    /// Clears every entry.
    pub fn zero(&mut self) {
        self.entries.iter_mut()
            .for_each(Entry::set_unused);
    }
}

impl<L> Table<L>
    where L: ParentLevel
{
    fn child_address(&self, index: usize) -> Option<usize> {
        let flags = self.entries[index].flags();
        if flags.contains(EntryFlags::PRESENT) && !flags.contains(EntryFlags::HUGE) {
            Some(child_table_address(self as *const _ as usize, index))
        } else {
            None
        }
    }

    /// The table behind an entry, if the entry points at one.
    pub fn next_table(&self, index: usize) -> Option<&Table<L::Child>> {
        self.child_address(index)
            .map(|addr| unsafe { &*(addr as *const _) })
    }

    pub fn next_table_mut(&mut self, index: usize) -> Option<&mut Table<L::Child>> {
        self.child_address(index)
            .map(|addr| unsafe { &mut *(addr as *mut _) })
    }

    /// Points an empty entry at a freshly allocated table frame. Returns whether a frame was
    /// installed; the new table still has to be zeroed through its recursive address.
    fn install_child<A>(&mut self, index: usize, alloc: &mut A) -> Result<bool, PagingError>
        where A: FrameAllocator
    {
        let entry = &mut self.entries[index];
        let flags = entry.flags();
        if flags.contains(EntryFlags::HUGE) {
            return Err(PagingError::AlreadyMapped);
        }
        if flags.contains(EntryFlags::PRESENT) {
            return Ok(false);
        }
        let frame = alloc.alloc().ok_or(PagingError::OutOfFrames)?;
        entry.set(frame, INTERMEDIATE);
        Ok(true)
    }

    /// Gets the table behind an entry, allocating an empty one if the entry is unused.
    pub fn next_table_create<A>(&mut self, index: usize, alloc: &mut A)
        -> Result<&mut Table<L::Child>, PagingError>
        where A: FrameAllocator
    {
        let created = self.install_child(index, alloc)?;
        let table = self.next_table_mut(index).ok_or(PagingError::NotMapped)?;
        if created {
            table.zero();
        }
        Ok(table)
    }
}

impl<L> Index<usize> for Table<L>
    where L: TableLevel
{
    type Output = Entry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl<L> IndexMut<usize> for Table<L>
    where L: TableLevel
{
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Level 4 (top) page table, reached through its own last entry.
pub const P4: *mut Table<TableLevel4> = 0o177777_777_777_777_777_0000 as *mut _;
