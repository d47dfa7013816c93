//! What the mapping code needs from the file layer: descriptor lookup, seeking, and reading.

use core::fmt;

/// An open-file descriptor number.
pub type Fd = i32;

/// Descriptor value passed by callers that have no file.
pub const NO_FILE: Fd = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    NotReadable,
    Io,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileError::NotReadable => write!(f, "file not open for reading"),
            FileError::Io => write!(f, "I/O error"),
        }
    }
}

/// An open file a mapping can be loaded from.
pub trait BackingFile {
    fn readable(&self) -> bool;

    /// Moves the read offset.
    fn set_offset(&mut self, offset: usize);

    /// Reads at the current offset, returning how many bytes were read. Zero means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError>;
}

/// A process's open files.
pub trait FileTable {
    type File: BackingFile;

    fn get(&self, fd: Fd) -> Option<&Self::File>;
    fn get_mut(&mut self, fd: Fd) -> Option<&mut Self::File>;
}
