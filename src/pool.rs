//! Segregated small-object pool allocator (SPEC_FULL §3 "Pool", §4.2).
//!
//! Grounded on `neptune/src/gc2.rs`'s `GcPool`/`Gc2::pool_alloc`/
//! `Gc2::add_page`, re-expressed with raw intrusive pointer lists instead of
//! Neptune's `Vec<&mut JlTaggedValue>` free list (Neptune's own comment
//! calls that `Vec` "more packed", but it cannot represent cells threaded
//! through their own header word, which is what SPEC_FULL's free-list
//! encoding requires).

use crate::header::{header_of, Header, HEADER_SIZE};
use crate::page::{PageSource, PAGE_SZ};
use std::mem;
use std::ptr::NonNull;

/// Size of the link field at the start of every page.
const LINK_SIZE: usize = mem::size_of::<*mut u8>();

/// Byte pattern stamped across a freed cell's payload under `memfence`
/// (SPEC_FULL §7, "Checked eagerly under the memfence/memdebug features via
/// canary validation"). The free-list link itself lives in the header word,
/// not the payload, so poisoning the payload can't clobber it.
#[cfg(feature = "memfence")]
const CANARY_BYTE: u8 = 0xAB;

#[cfg(feature = "memfence")]
pub(crate) unsafe fn poison_cell(payload: NonNull<u8>, payload_len: usize) {
    std::ptr::write_bytes(payload.as_ptr(), CANARY_BYTE, payload_len);
}

#[cfg(feature = "memfence")]
unsafe fn verify_canary(payload: NonNull<u8>, payload_len: usize) {
    let bytes = std::slice::from_raw_parts(payload.as_ptr(), payload_len);
    if bytes.iter().any(|&b| b != CANARY_BYTE) {
        crate::error::fatal_with(
            crate::error::GcError::CorruptHeader,
            "pool cell canary overwritten while free (use-after-free)",
        );
    }
}

/// One size class's page list and free list.
pub struct Pool {
    /// Cell size for this pool: the size class's nominal size plus one
    /// header word.
    pub osize: usize,
    /// Head of the page list; `None` if no page has been requested yet.
    pages: Option<NonNull<u8>>,
    /// Head of the free list; payload pointers, threaded through headers.
    freelist: Option<NonNull<u8>>,
}

impl Pool {
    pub fn new(osize: usize) -> Self {
        debug_assert!(osize >= HEADER_SIZE + 1);
        Pool {
            osize,
            pages: None,
            freelist: None,
        }
    }

    #[inline]
    pub fn cells_per_page(&self) -> usize {
        (PAGE_SZ - LINK_SIZE) / self.osize
    }

    /// Head of this pool's page list, for the sweeper to walk.
    pub(crate) fn pages_head(&self) -> Option<NonNull<u8>> {
        self.pages
    }

    pub(crate) fn set_pages_head(&mut self, head: Option<NonNull<u8>>) {
        self.pages = head;
    }

    pub(crate) fn freelist_head(&self) -> Option<NonNull<u8>> {
        self.freelist
    }

    pub(crate) fn set_freelist_head(&mut self, head: Option<NonNull<u8>>) {
        self.freelist = head;
    }

    /// Allocate one page from `src`, thread its cells onto the free list
    /// (prepended ahead of whatever was already free), and link the page
    /// into `pages` ahead of the previous head.
    ///
    /// This is where the original design's documented bug lived: linking
    /// the new page's `next` to its own stale value instead of to the
    /// pool's prior `pages` head, which would have orphaned every page
    /// already in the list. Here the prior head is read and stored into
    /// the new page's link *before* `pages` is overwritten, so the chain
    /// stays intact.
    pub fn add_page(&mut self, src: &mut dyn PageSource) {
        let page = src.alloc_page();
        let raw = page.as_ptr();
        let prior_pages = self.pages;
        unsafe {
            *(raw as *mut *mut u8) = prior_pages.map_or(std::ptr::null_mut(), |p| p.as_ptr());
        }
        self.pages = Some(page);

        let n = self.cells_per_page();
        let mut head = self.freelist;
        for i in (0..n).rev() {
            unsafe {
                let cell = raw.add(LINK_SIZE + i * self.osize);
                let payload = NonNull::new_unchecked(cell.add(HEADER_SIZE));
                let hdr = &mut *(cell as *mut Header);
                hdr.set_free_next(head);
                #[cfg(feature = "memfence")]
                poison_cell(payload, self.osize - HEADER_SIZE);
                head = Some(payload);
            }
        }
        self.freelist = head;
    }

    /// Return a pointer to an uninitialized, zero-headered payload.
    pub fn alloc(&mut self, src: &mut dyn PageSource) -> NonNull<u8> {
        if self.freelist.is_none() {
            self.add_page(src);
        }
        let payload = self.freelist.expect("add_page must populate the free list");
        unsafe {
            #[cfg(feature = "memfence")]
            verify_canary(payload, self.osize - HEADER_SIZE);
            let hdr = header_of(payload);
            self.freelist = hdr.free_next();
            hdr.zero();
        }
        payload
    }
}

/// Read the `next` link at the start of a page.
pub(crate) unsafe fn page_next(page: NonNull<u8>) -> Option<NonNull<u8>> {
    NonNull::new(*(page.as_ptr() as *mut *mut u8))
}

/// The first cell's header address within `page`.
pub(crate) unsafe fn first_cell(page: NonNull<u8>) -> *mut u8 {
    page.as_ptr().add(LINK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::mock::MockPageSource;

    #[test]
    fn alloc_without_pages_adds_one() {
        let mut pool = Pool::new(16);
        let mut src = MockPageSource::new();
        assert_eq!(src.alloc_count, 0);
        let p = pool.alloc(&mut src);
        assert_eq!(src.alloc_count, 1);
        unsafe {
            let hdr = header_of(p);
            assert!(!hdr.is_free());
            assert!(!hdr.marked());
        }
    }

    #[test]
    fn allocations_within_a_page_are_distinct() {
        let mut pool = Pool::new(16);
        let mut src = MockPageSource::new();
        let n = pool.cells_per_page();
        assert!(n > 1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..n {
            let p = pool.alloc(&mut src);
            assert!(seen.insert(p.as_ptr() as usize), "duplicate cell handed out");
        }
        // exhausting the page forces a second one
        assert_eq!(src.alloc_count, 1);
        pool.alloc(&mut src);
        assert_eq!(src.alloc_count, 2);
    }

    #[test]
    fn add_page_does_not_orphan_prior_pages() {
        let mut pool = Pool::new(16);
        let mut src = MockPageSource::new();
        pool.add_page(&mut src);
        let first = pool.pages_head().unwrap();
        pool.add_page(&mut src);
        let second = pool.pages_head().unwrap();
        assert_ne!(first.as_ptr(), second.as_ptr());
        // the second page's link must point back at the first, not be null
        let linked = unsafe { page_next(second) };
        assert_eq!(linked, Some(first));
    }

    #[test]
    fn freelist_has_no_duplicates_after_one_page() {
        let mut pool = Pool::new(16);
        let mut src = MockPageSource::new();
        pool.add_page(&mut src);
        let mut seen = std::collections::HashSet::new();
        let mut cur = pool.freelist_head();
        let mut count = 0;
        while let Some(p) = cur {
            assert!(seen.insert(p.as_ptr() as usize));
            count += 1;
            cur = unsafe { header_of(p).free_next() };
        }
        assert_eq!(count, pool.cells_per_page());
    }

    #[cfg(feature = "memfence")]
    #[test]
    fn freshly_freed_cell_reads_back_as_canary() {
        let mut pool = Pool::new(24);
        let mut src = MockPageSource::new();
        let p = pool.alloc(&mut src);
        unsafe { header_of(p).set_free_next(None) };
        unsafe { poison_cell(p, pool.osize - HEADER_SIZE) };
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), pool.osize - HEADER_SIZE) };
        assert!(bytes.iter().all(|&b| b == CANARY_BYTE));
    }

    #[cfg(feature = "memfence")]
    #[test]
    fn stray_write_into_a_free_cell_breaks_its_canary() {
        // fatal_with aborts the process rather than panicking, so this
        // exercises the corruption *detection* (the byte comparison
        // verify_canary relies on) without actually invoking it.
        let mut pool = Pool::new(24);
        let mut src = MockPageSource::new();
        let p = pool.alloc(&mut src);
        unsafe { poison_cell(p, pool.osize - HEADER_SIZE) };
        unsafe { *p.as_ptr() = 0x00 };
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), pool.osize - HEADER_SIZE) };
        assert!(bytes.iter().any(|&b| b != CANARY_BYTE));
    }
}
