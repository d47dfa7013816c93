use bit_field::BitField;
use bitflags::bitflags;
use static_assertions::assert_eq_size;
use crate::memory::{Frame, PAGE_SIZE};
use super::Access;

/// An entry in a page table.
///
/// Page table entries for x86_64 are 64 bits wide. Bits 12 through 51 hold the frame address.
pub struct Entry(u64);

assert_eq_size!(Entry, u64);

impl Entry {
    pub fn is_used(&self) -> bool {
        self.0 != 0
    }

    pub fn set_unused(&mut self) {
        self.0 = 0;
    }

    /// Gets the flags of this entry.
    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    fn address(&self) -> usize {
        (self.0.get_bits(12..52) as usize) * PAGE_SIZE
    }

    /// Gets the physical frame that this virtual page entry is pointing at, if it is present.
    pub fn to_frame(&self) -> Option<Frame> {
        if self.flags().contains(EntryFlags::PRESENT) {
            Some(Frame::containing_address(self.address()))
        } else {
            None
        }
    }

    /// Sets the frame and flags for this entry.
    pub fn set(&mut self, frame: Frame, flags: EntryFlags) {
        let mut raw = flags.bits();
        raw.set_bits(12..52, frame.number() as u64);
        self.0 = raw;
    }

    /// Sets the flags for this entry, keeping the frame it points at.
    ///
    /// Note that this will overwrite the "PRESENT" flag if not accounted for.
    pub fn set_flags(&mut self, flags: EntryFlags) {
        let number = self.0.get_bits(12..52);
        let mut raw = flags.bits();
        raw.set_bits(12..52, number);
        self.0 = raw;
    }

    /// Gets how a user page may be accessed, if this entry maps one.
    pub fn access(&self) -> Option<Access> {
        let flags = self.flags();
        if !flags.contains(EntryFlags::PRESENT) {
            None
        } else if flags.contains(EntryFlags::COPY_ON_WRITE) {
            Some(Access::CopyOnWrite)
        } else if flags.contains(EntryFlags::WRITABLE) {
            Some(Access::Writable)
        } else {
            Some(Access::ReadOnly)
        }
    }
}

bitflags! {
    /// Flags for page table entries.
    pub struct EntryFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITETHROUGH  = 1 << 3;
        const DISABLECACHE  = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        // bits 9-11 and 52-62 are unused by the CPU
        const COPY_ON_WRITE = 1 << 9;
        const NOEXEC        = 1 << 63;
    }
}

impl From<Access> for EntryFlags {
    /// Flags for a present user page with the given access.
    fn from(access: Access) -> Self {
        let base = EntryFlags::PRESENT | EntryFlags::USER;
        match access {
            Access::ReadOnly => base,
            Access::Writable => base | EntryFlags::WRITABLE,
            // read-only in hardware, so the first write traps
            Access::CopyOnWrite => base | EntryFlags::COPY_ON_WRITE,
        }
    }
}
