mod frame;
mod paging;
mod refcount;
mod pool;
mod region;
mod wmap;
mod loader;
mod fault;
mod cow;
pub mod map;

#[cfg(test)]
pub(crate) mod testing;

pub use self::frame::*;
pub use self::paging::*;
pub use self::refcount::*;
pub use self::pool::*;
pub use self::region::*;
pub use self::wmap::*;
pub use self::loader::*;
pub use self::fault::*;
pub use self::cow::*;

/// Rounds an address down to the start of its page.
pub const fn page_round_down(address: usize) -> usize {
    address & !(PAGE_SIZE - 1)
}

/// Rounds a length up to a whole number of pages, or `None` if that would overflow.
pub fn page_round_up(length: usize) -> Option<usize> {
    length.checked_add(PAGE_SIZE - 1)
        .map(page_round_down)
}

pub const fn is_page_aligned(address: usize) -> bool {
    address % PAGE_SIZE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x6000_0fff), 0x6000_0000);
        assert_eq!(page_round_up(1), Some(PAGE_SIZE));
        assert_eq!(page_round_up(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(page_round_up(PAGE_SIZE + 1), Some(2 * PAGE_SIZE));
        assert_eq!(page_round_up(usize::MAX), None);
        assert!(is_page_aligned(0x6000_0000));
        assert!(!is_page_aligned(0x6000_0010));
    }
}
