//! The cell header: a single machine word shared by every pool cell and
//! every big object, living immediately before the client payload.
//!
//! The word is a tagged union of three interpretations (SPEC_FULL §3):
//! a free-list link, a flags word (`marked`/`finalize`), or (our resolution
//! of the "header aliasing" open question) an explicit `free` discriminator
//! bit that lets the sweeper tell live-but-unmarked cells apart from cells
//! already on a free list without relying on incidental pointer alignment.

use bit_field::BitField;
use std::mem;
use std::ptr::NonNull;

/// Size in bytes of a cell header; every payload pointer is preceded by
/// exactly this many bytes.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Bit 0: set while an object is reachable from the current mark phase.
pub const MARK_BIT: usize = 0;
/// Bit 1: reserved for future finalizer registration. Declared, never wired.
pub const FINALIZE_BIT: usize = 1;
/// Bit 2: the explicit free/live discriminator (see module docs).
pub const FREE_BIT: usize = 2;

/// Mask for the single `FREE_BIT` discriminator. A live cell must have it
/// clear; a free cell's header is a word-aligned pointer with this bit
/// OR'd in (see `set_free_next`/`free_next` below).
const RESERVED_MASK: usize = 1 << FREE_BIT;

/// A cell header word. Every pool cell and every big object's `BigHeader`
/// embeds one of these immediately before the payload.
///
/// Plain `usize`, not atomic: concurrent mutation of the heap from another
/// thread is a NON-GOAL (SPEC_FULL §5), so there is nothing to synchronize.
#[repr(transparent)]
pub struct Header(usize);

impl Header {
    /// A zeroed header: live, unmarked, not scheduled for finalization.
    #[inline(always)]
    pub fn zeroed() -> Self {
        Header(0)
    }

    #[inline(always)]
    pub fn zero(&mut self) {
        self.0 = 0;
    }

    #[inline(always)]
    pub fn marked(&self) -> bool {
        self.0.get_bit(MARK_BIT)
    }

    #[inline(always)]
    pub fn set_marked(&mut self, flag: bool) {
        self.0.set_bit(MARK_BIT, flag);
    }

    #[inline(always)]
    pub fn finalize(&self) -> bool {
        self.0.get_bit(FINALIZE_BIT)
    }

    #[inline(always)]
    pub fn set_finalize(&mut self, flag: bool) {
        self.0.set_bit(FINALIZE_BIT, flag);
    }

    /// True if the free discriminator bit is set, i.e. this cell is on a free list.
    #[inline(always)]
    pub fn is_free(&self) -> bool {
        self.0 & RESERVED_MASK != 0
    }

    /// Encode this header as a free-list link pointing at `next` (or the
    /// list terminator, if `None`), setting the free discriminator bit.
    ///
    /// # Safety
    /// `next`, if present, must be word-aligned (guaranteed for any payload
    /// pointer returned by the pool allocator, since every size class is a
    /// multiple of the header word size).
    #[inline(always)]
    pub unsafe fn set_free_next(&mut self, next: Option<NonNull<u8>>) {
        let raw = next.map_or(0, |p| p.as_ptr() as usize);
        debug_assert_eq!(raw & RESERVED_MASK, 0, "free-list link is not word-aligned");
        self.0 = raw | (1 << FREE_BIT);
    }

    /// Decode the free-list link stored in this header, masking off the
    /// discriminator bit. Only meaningful when `is_free()` is true.
    #[inline(always)]
    pub fn free_next(&self) -> Option<NonNull<u8>> {
        debug_assert!(self.is_free());
        NonNull::new((self.0 & !RESERVED_MASK) as *mut u8)
    }
}

/// Compute the header immediately preceding `payload`.
///
/// # Safety
/// `payload` must be a live payload pointer returned by the pool or
/// big-object allocator (i.e. `payload - HEADER_SIZE` must be a valid,
/// readable/writable `Header`).
#[inline(always)]
pub unsafe fn header_of<'a>(payload: NonNull<u8>) -> &'a mut Header {
    &mut *(payload.as_ptr().sub(HEADER_SIZE) as *mut Header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_header_is_live_and_unmarked() {
        let h = Header::zeroed();
        assert!(!h.is_free());
        assert!(!h.marked());
        assert!(!h.finalize());
    }

    #[test]
    fn mark_bit_round_trips() {
        let mut h = Header::zeroed();
        h.set_marked(true);
        assert!(h.marked());
        assert!(!h.is_free());
        h.set_marked(false);
        assert!(!h.marked());
    }

    #[test]
    fn free_link_round_trips_and_marks_free() {
        let mut h = Header::zeroed();
        unsafe { h.set_free_next(None) };
        assert!(h.is_free());
        assert_eq!(h.free_next(), None);

        let fake: NonNull<u8> = NonNull::new(0x1000 as *mut u8).unwrap();
        let mut h2 = Header::zeroed();
        unsafe { h2.set_free_next(Some(fake)) };
        assert!(h2.is_free());
        assert_eq!(h2.free_next(), Some(fake));
    }

    #[test]
    fn free_bit_is_disjoint_from_mark_and_finalize() {
        assert_ne!(MARK_BIT, FREE_BIT);
        assert_ne!(FINALIZE_BIT, FREE_BIT);
    }
}
