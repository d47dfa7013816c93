use crate::file::{BackingFile, FileError};
use crate::memory::PAGE_SIZE;

/// Fills a page with file content starting at `offset`.
///
/// Reads until the page is full or the file runs out; whatever lies past end-of-file keeps the
/// page's previous contents. Returns the number of bytes loaded.
pub fn load_page<F>(file: &mut F, offset: usize, page: &mut [u8; PAGE_SIZE]) -> Result<usize, FileError>
    where F: BackingFile
{
    if !file.readable() {
        return Err(FileError::NotReadable);
    }
    file.set_offset(offset);
    let mut filled = 0;
    while filled < PAGE_SIZE {
        match file.read(&mut page[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
