//! In-memory stand-ins for page tables, physical memory, and files.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicU32;
use crate::file::{BackingFile, Fd, FileError, FileTable};
use crate::memory::{
    Access, AddressSpace, Frame, FrameAllocator, FramePool, FrameRefTable, Page, PagingError,
    PhysicalMemory, Translation, PAGE_SIZE,
};

/// Reference counters plus a fixed number of frames of simulated RAM.
pub struct Machine {
    counts: Vec<AtomicU32>,
    frames: usize,
}

impl Machine {
    pub fn new(frames: usize) -> Self {
        Machine {
            counts: (0..frames.max(1)).map(|_| AtomicU32::new(0)).collect(),
            frames,
        }
    }

    pub fn pool(&self) -> FramePool<'_, SimAllocator, SimMemory> {
        FramePool::new(SimAllocator::new(self.frames), SimMemory::new(self.frames),
                       FrameRefTable::new(&self.counts))
    }
}

/// Hands out frames lowest-first and reuses the most recently released one.
pub struct SimAllocator {
    free: Vec<Frame>,
    total: usize,
}

impl SimAllocator {
    pub fn new(frames: usize) -> Self {
        SimAllocator {
            free: (0..frames).rev().map(Frame::from_number).collect(),
            total: frames,
        }
    }

    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.total - self.free.len()
    }
}

impl FrameAllocator for SimAllocator {
    fn alloc(&mut self) -> Option<Frame> {
        self.free.pop()
    }

    fn dealloc(&mut self, frame: Frame) {
        assert!(!self.free.contains(&frame), "double free of frame {}", frame.number());
        self.free.push(frame);
    }
}

pub struct SimMemory {
    frames: Vec<[u8; PAGE_SIZE]>,
}

impl SimMemory {
    pub fn new(frames: usize) -> Self {
        SimMemory { frames: vec![[0xcc; PAGE_SIZE]; frames] }
    }
}

impl PhysicalMemory for SimMemory {
    fn frame(&self, frame: Frame) -> &[u8; PAGE_SIZE] {
        &self.frames[frame.number()]
    }

    fn frame_mut(&mut self, frame: Frame) -> &mut [u8; PAGE_SIZE] {
        &mut self.frames[frame.number()]
    }
}

/// Page tables as a map from page to translation.
///
/// Each 2 MiB stretch touched takes one frame from the allocator for its last-level table, so
/// page-table exhaustion can be exercised.
#[derive(Default)]
pub struct SimSpace {
    entries: BTreeMap<Page, Translation>,
    tables: BTreeSet<usize>,
    table_frames: Vec<Frame>,
    reloads: usize,
}

impl SimSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn table_frames(&self) -> usize {
        self.table_frames.len()
    }

    pub fn reloads(&self) -> usize {
        self.reloads
    }

    fn table_of(page: Page) -> usize {
        page.start_address() / (512 * PAGE_SIZE)
    }
}

impl AddressSpace for SimSpace {
    fn lookup(&self, page: Page) -> Option<Translation> {
        self.entries.get(&page).copied()
    }

    fn map_to<A>(&mut self, page: Page, frame: Frame, access: Access, allocator: &mut A)
        -> Result<(), PagingError>
        where A: FrameAllocator
    {
        if self.entries.contains_key(&page) {
            return Err(PagingError::AlreadyMapped);
        }
        let table = Self::table_of(page);
        if !self.tables.contains(&table) {
            let table_frame = allocator.alloc().ok_or(PagingError::OutOfFrames)?;
            self.table_frames.push(table_frame);
            self.tables.insert(table);
        }
        self.entries.insert(page, Translation { frame, access });
        Ok(())
    }

    fn remap(&mut self, page: Page, frame: Frame, access: Access) -> Result<(), PagingError> {
        let entry = self.entries.get_mut(&page).ok_or(PagingError::NotMapped)?;
        *entry = Translation { frame, access };
        Ok(())
    }

    fn set_access(&mut self, page: Page, access: Access) -> Result<(), PagingError> {
        let entry = self.entries.get_mut(&page).ok_or(PagingError::NotMapped)?;
        entry.access = access;
        Ok(())
    }

    fn unmap(&mut self, page: Page) -> Option<Translation> {
        self.entries.remove(&page)
    }

    fn reload(&mut self) {
        self.reloads += 1;
    }
}

/// A file held in memory.
#[derive(Debug, Clone)]
pub struct MemFile {
    contents: Vec<u8>,
    offset: usize,
    readable: bool,
    failing: bool,
    chunk: usize,
}

impl MemFile {
    pub fn new(contents: Vec<u8>) -> Self {
        MemFile { contents, offset: 0, readable: true, failing: false, chunk: usize::MAX }
    }

    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }

    /// Every read reports an I/O error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Limits how many bytes a single read returns.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

impl BackingFile for MemFile {
    fn readable(&self) -> bool {
        self.readable
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        if self.failing {
            return Err(FileError::Io);
        }
        let start = self.offset.min(self.contents.len());
        let n = buf.len()
            .min(self.chunk)
            .min(self.contents.len() - start);
        buf[..n].copy_from_slice(&self.contents[start..start + n]);
        self.offset += n;
        Ok(n)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemFiles {
    files: BTreeMap<Fd, MemFile>,
}

impl MemFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fd: Fd, file: MemFile) {
        self.files.insert(fd, file);
    }

    pub fn close(&mut self, fd: Fd) {
        self.files.remove(&fd);
    }
}

impl FileTable for MemFiles {
    type File = MemFile;

    fn get(&self, fd: Fd) -> Option<&MemFile> {
        self.files.get(&fd)
    }

    fn get_mut(&mut self, fd: Fd) -> Option<&mut MemFile> {
        self.files.get_mut(&fd)
    }
}
