//! Lazily-populated user mappings with copy-on-write frame sharing.
//!
//! Processes reserve virtual ranges with `wmap`; nothing is backed until the first access faults,
//! at which point the fault handler allocates a zeroed page (or loads it from the backing file).
//! Frames shared between address spaces are reference counted and duplicated on write.
#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "x86_64")]
pub mod arch;
pub mod memory;
pub mod file;
pub mod process;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("Panic: {}", info);
    loop {}
}
