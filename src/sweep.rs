//! Sweep phase: reclaim unmarked cells, release fully-free pages, clear
//! survivors' mark bits (SPEC_FULL §4.6).
//!
//! Grounded on `neptune/src/gc2.rs`'s sweep bookkeeping (`PageMeta.nfree`/
//! `fl_begin_offset`/`fl_end_offset`, `Gc2::sweep`) and the page-release path
//! in `neptune/src/pages.rs` (`PageMgr::free_page_in_region`). SPEC_FULL has
//! no per-page offset metadata or region decommit step, and the sweep
//! invariant (SPEC_FULL §4.6) only requires freelist membership/uniqueness,
//! not order, so free cells found on a surviving page are threaded onto the
//! pool's free list by prepending rather than via an append-with-rewind
//! cursor: a page's free cells are buffered locally while it is classified,
//! then spliced in only if the page turns out to have a live cell.

use crate::big::BigList;
use crate::header::{header_of, HEADER_SIZE};
use crate::page::PageSource;
use crate::pool::{first_cell, page_next, Pool};
use std::ptr::NonNull;

/// Sweep the big-object list (SPEC_FULL §4.6, run before any pool).
pub fn sweep_big(big: &mut BigList) {
    big.sweep();
}

/// Sweep one pool's pages, rebuilding its free list and releasing any page
/// that turned out to be entirely free.
pub fn sweep_pool(pool: &mut Pool, src: &mut dyn PageSource) {
    let osize = pool.osize;
    let cells_per_page = pool.cells_per_page();

    // The rebuilt free list starts empty, not from `pool.freelist_head()`:
    // every cell already on the pre-sweep free list physically lives in one
    // of these pages and is independently rediscovered below via
    // `hdr.is_free()`. Seeding from the old head would bake that cell's
    // address in as a `next` link for whatever gets processed first, and
    // then overwrite the same cell's own header later in the same page's
    // scan, producing a cycle instead of a list terminating in null.
    let mut freelist: Option<NonNull<u8>> = None;
    let mut surviving_pages: Option<NonNull<u8>> = None;

    let mut page_cursor = pool.pages_head();
    while let Some(page) = page_cursor {
        let next_page = unsafe { page_next(page) };

        let mut page_free: Vec<NonNull<u8>> = Vec::with_capacity(cells_per_page);
        let mut any_non_free = false;

        unsafe {
            let mut cell = first_cell(page);
            for _ in 0..cells_per_page {
                let payload = NonNull::new_unchecked(cell.add(HEADER_SIZE));
                let hdr = header_of(payload);
                if hdr.is_free() {
                    page_free.push(payload);
                } else if hdr.marked() {
                    hdr.set_marked(false);
                    any_non_free = true;
                } else {
                    page_free.push(payload);
                }
                cell = cell.add(osize);
            }
        }

        if any_non_free {
            for payload in page_free {
                unsafe {
                    header_of(payload).set_free_next(freelist);
                    #[cfg(feature = "memfence")]
                    crate::pool::poison_cell(payload, osize - HEADER_SIZE);
                }
                freelist = Some(payload);
            }
            unsafe {
                let raw = page.as_ptr();
                *(raw as *mut *mut u8) =
                    surviving_pages.map_or(std::ptr::null_mut(), |p| p.as_ptr());
            }
            surviving_pages = Some(page);
        } else {
            unsafe { src.free_page(page) };
        }

        page_cursor = next_page;
    }

    pool.set_freelist_head(freelist);
    pool.set_pages_head(surviving_pages);
}
