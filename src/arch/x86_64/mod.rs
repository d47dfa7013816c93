pub mod serial;

use ::x86_64::{
    instructions::tlb,
    registers::control::{Cr0, Cr0Flags, Cr2, Cr3},
    VirtAddr,
};
use crate::file::FileTable;
use crate::memory::map::PHYS_MAP_BASE;
use crate::memory::{
    ActivePageTable, DirectMap, FaultError, FrameAllocator, FramePool, Resolution, VirtualAddress,
};
use crate::process::Process;

/// Brings up the pieces of the CPU the mapping code relies on.
pub fn init(level: log::LevelFilter) {
    serial::init(level);
    enable_kernel_write_protect();
}

/// Enables write protection of pages in kernel mode.
///
/// By default, when in kernel mode, x86 ignores the write-protect bit on pages. Copy-on-write
/// pages are only read-only in hardware, so the kernel has to honor it too.
pub fn enable_kernel_write_protect() {
    unsafe {
        Cr0::update(|flags| flags.insert(Cr0Flags::WRITE_PROTECT));
    }
}

/// Physical memory as reached through the kernel's linear map of all RAM.
pub fn physical_memory() -> DirectMap {
    // the boot code maps every frame below PHYS_TOP at PHYS_MAP_BASE
    unsafe { DirectMap::new(PHYS_MAP_BASE) }
}

/// Gets the linear address that caused the most recent page fault.
pub fn fault_address() -> VirtualAddress {
    Cr2::read().as_u64() as usize
}

/// Drops the TLB entry for a single page.
pub fn flush_page(address: VirtualAddress) {
    tlb::flush(VirtAddr::new(address as u64));
}

/// Reloads CR3 with its current value, discarding every non-global translation.
pub fn reload_address_space() {
    let (frame, flags) = Cr3::read();
    unsafe {
        Cr3::write(frame, flags);
    }
}

/// Page fault entry for faults raised from user mode.
///
/// The trap dispatcher calls this with the current process; the process is marked killed if the
/// fault could not be resolved and is reaped on its way back to user space.
pub fn handle_user_page_fault<T, A>(process: &mut Process<ActivePageTable, T>,
                                    pool: &mut FramePool<'_, A, DirectMap>)
    -> Result<Resolution, FaultError>
    where T: FileTable, A: FrameAllocator
{
    process.page_fault(fault_address(), pool)
}
