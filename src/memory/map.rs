//! The operating system's memory map.
//!
//! Every place in memory must be mapped in such a way that it does not overlap. This module helps
//! lay out all memory regions in a single location so that conflicts are easy to spot.

use static_assertions::const_assert;
use crate::memory::PAGE_SIZE;

/// Lowest address handed out by `wmap`.
pub const MMAP_BASE: usize                              = 0x0000_0000_6000_0000
        ;

/// End (exclusive) of the `wmap` window.
pub const MMAP_END: usize                               = 0x0000_0000_8000_0000
        ;

/// The start address for the kernel.
///
/// This starts 3/4s the way up in virtual memory.
pub const KERNEL_BASE: usize                            = 0xffff_8000_0000_0000
        ;

/// All of physical memory is mapped starting here, so the kernel can reach any frame.
pub const PHYS_MAP_BASE: usize                          = 0x0000_0100_0000_0000
        + KERNEL_BASE;

/// Top of usable physical memory.
pub const PHYS_TOP: usize                               = 0x0000_0000_0e00_0000
        ;

const_assert!(MMAP_BASE < MMAP_END);
const_assert!(MMAP_BASE % PAGE_SIZE == 0 && MMAP_END % PAGE_SIZE == 0);
const_assert!(MMAP_END <= KERNEL_BASE);
const_assert!(PHYS_TOP % PAGE_SIZE == 0);
