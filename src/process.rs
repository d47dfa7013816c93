//! The per-process view of user mappings.

use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, warn};
use crate::file::{Fd, FileTable};
use crate::memory::{
    self, AddressSpace, FaultError, FaultStats, FrameAllocator, FramePool, FrameRefTable, MapError,
    MapFlags, MapInfo, Page, PagingError, PhysicalAddress, PhysicalMemory, RegionTable, Resolution,
    VirtualAddress, MAP_FAILED, PAGE_SIZE,
};

pub type Pid = u32;

pub struct Process<S, T> {
    pid: Pid,
    space: S,
    regions: RegionTable,
    files: T,
    killed: AtomicBool,
    stats: FaultStats,
}

impl<S, T> Process<S, T>
    where S: AddressSpace, T: FileTable
{
    pub fn new(pid: Pid, space: S, files: T) -> Self {
        Process {
            pid,
            space,
            regions: RegionTable::new(),
            files,
            killed: AtomicBool::new(false),
            stats: FaultStats::default(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn space(&self) -> &S {
        &self.space
    }

    pub fn files_mut(&mut self) -> &mut T {
        &mut self.files
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }

    /// Reserves a mapping. See [`memory::reserve`].
    pub fn wmap(&mut self, address: VirtualAddress, length: usize, flags: MapFlags, fd: Fd)
        -> Result<VirtualAddress, MapError>
    {
        memory::reserve(&mut self.regions, &self.files, address, length, flags, fd)
    }

    pub fn wmapinfo(&self) -> MapInfo {
        self.regions.info()
    }

    /// Physical address a user address currently maps to.
    ///
    /// Entries whose frame has no references left are stale and translate to nothing.
    pub fn translate(&self, address: VirtualAddress, refs: FrameRefTable<'_>)
        -> Option<PhysicalAddress>
    {
        let page = Page::try_containing_address(address)?;
        let translation = self.space.lookup(page)?;
        if refs.read(translation.frame) == 0 {
            return None;
        }
        Some(translation.frame.start_address() + address % PAGE_SIZE)
    }

    /// Handles a page fault raised by this process.
    ///
    /// An unresolved fault marks the process killed; the caller reaps it before it next returns
    /// to user space.
    pub fn page_fault<A, M>(&mut self, address: VirtualAddress, pool: &mut FramePool<'_, A, M>)
        -> Result<Resolution, FaultError>
        where A: FrameAllocator, M: PhysicalMemory
    {
        let outcome = memory::resolve(address, &mut self.space, &mut self.regions, &mut self.files,
                                      pool);
        self.stats.record(&outcome);
        if let Err(e) = outcome {
            warn!("pid {}: {} at {:#x}, killing", self.pid, e, address);
            self.kill();
        }
        outcome
    }

    /// Marks the process for termination. Safe to call from any context.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Creates a child that sees the same mappings.
    ///
    /// Private pages are shared copy-on-write, shared pages stay shared. The child gets a copy of
    /// the region table and the file table. If the child's page tables cannot be built, whatever
    /// it already mapped is released and the error is returned.
    pub fn fork<A, M>(&mut self, pid: Pid, space: S, pool: &mut FramePool<'_, A, M>)
        -> Result<Process<S, T>, PagingError>
        where T: Clone, A: FrameAllocator, M: PhysicalMemory
    {
        let mut child = Process::new(pid, space, self.files.clone());
        child.regions = self.regions.clone();
        if let Err(e) = memory::duplicate(&self.regions, &mut self.space, &mut child.space, pool) {
            warn!("pid {}: fork failed: {}", self.pid, e);
            child.exit(pool);
            return Err(e);
        }
        info!("pid {}: forked pid {} with {} mappings", self.pid, pid, child.regions.len());
        Ok(child)
    }

    /// Releases every mapping, returning the number of pages unmapped.
    pub fn exit<A, M>(&mut self, pool: &mut FramePool<'_, A, M>) -> usize
        where A: FrameAllocator, M: PhysicalMemory
    {
        let pages = memory::release_all(&mut self.regions, &mut self.space, pool);
        info!("pid {}: released {} pages", self.pid, pages);
        pages
    }
}

/// The `wmap` system call as user space sees it: the mapping's base address, or `MAP_FAILED`.
pub fn sys_wmap<S, T>(process: &mut Process<S, T>, address: VirtualAddress, length: isize,
                      raw_flags: u32, fd: Fd) -> VirtualAddress
    where S: AddressSpace, T: FileTable
{
    let flags = match MapFlags::from_bits(raw_flags) {
        Some(flags) => flags,
        None => {
            warn!("pid {}: wmap with unknown flags {:#x}", process.pid, raw_flags);
            return MAP_FAILED;
        },
    };
    if length < 0 {
        warn!("pid {}: wmap with negative length {}", process.pid, length);
        return MAP_FAILED;
    }
    match process.wmap(address, length as usize, flags, fd) {
        Ok(base) => base,
        Err(e) => {
            warn!("pid {}: wmap({:#x}, {:#x}, {:?}, {}): {}", process.pid, address, length, flags,
                  fd, e);
            MAP_FAILED
        },
    }
}
