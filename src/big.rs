//! Big-object allocator: a single global intrusive list for allocations
//! above `MAX_SMALL_SIZE` (SPEC_FULL §3 "Big object", §4.3).
//!
//! Grounded on `neptune/src/gc.rs`'s `BigVal`, simplified: Neptune's
//! `szOrAge`/`headerOrBits` fields are a transmute-based union carrying
//! Julia's generational age bits, which are out of scope here
//! (NON-GOALS: generational partitioning). SPEC_FULL's big object is just
//! `next` + one flags word, so `BigHeader` is a plain two-field struct with
//! `Header` doing double duty as Neptune's header word did.

use crate::error::fatal;
use crate::header::Header;
use libc::{c_void, free, malloc};
use std::mem;
use std::ptr::NonNull;

#[repr(C)]
struct BigHeader {
    next: Option<NonNull<BigHeader>>,
    header: Header,
}

const BIG_HEADER_SIZE: usize = mem::size_of::<BigHeader>();

/// `memdebug` counterpart to `pool::CANARY_BYTE`/`poison_cell`: the same
/// eager corruption discipline, applied to the big-object path instead of
/// pools (SPEC_FULL §7, "tell pool corruption apart from big-object
/// corruption"). Big objects are never reused from a free list the way pool
/// cells are, so there is no later reuse point to verify a canary at;
/// instead the leading payload word is stamped right before the block is
/// handed back to `free()`, so a dangling host pointer that keeps
/// writing/reading afterward reliably observes garbage.
#[cfg(feature = "memdebug")]
const CANARY_BYTE: u8 = 0xCD;

#[cfg(feature = "memdebug")]
unsafe fn poison_before_free(payload: *mut u8, len: usize) {
    std::ptr::write_bytes(payload, CANARY_BYTE, len);
}

/// Head of the global big-object list.
pub struct BigList {
    head: Option<NonNull<BigHeader>>,
}

impl BigList {
    pub fn new() -> Self {
        BigList { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Allocate `sz` payload bytes on the big-object path: `sz + 2*word`
    /// bytes from the OS, prepended to the list, header zeroed.
    pub fn alloc(&mut self, sz: usize) -> NonNull<u8> {
        let total = BIG_HEADER_SIZE + sz;
        let raw = unsafe { malloc(total) } as *mut BigHeader;
        if raw.is_null() {
            fatal("malloc failed while allocating a big object");
        }
        unsafe {
            (*raw).next = self.head;
            (*raw).header = Header::zeroed();
        }
        self.head = NonNull::new(raw);
        unsafe { NonNull::new_unchecked((raw as *mut u8).add(BIG_HEADER_SIZE)) }
    }

    /// Walk the list with a previous-link cursor. Marked nodes are kept
    /// (mark bit cleared); unmarked nodes are unlinked and `free`d.
    pub fn sweep(&mut self) {
        let mut cursor: *mut Option<NonNull<BigHeader>> = &mut self.head;
        unsafe {
            while let Some(node) = *cursor {
                let node_ref = &mut *node.as_ptr();
                if node_ref.header.marked() {
                    node_ref.header.set_marked(false);
                    cursor = &mut node_ref.next;
                } else {
                    *cursor = node_ref.next;
                    // Poison the payload's leading word so a dangling host
                    // pointer that keeps writing/reading after this point
                    // reliably sees garbage rather than stale live-looking
                    // data. The allocator doesn't retain each block's exact
                    // size, so only the leading word is stamped.
                    #[cfg(feature = "memdebug")]
                    poison_before_free((node.as_ptr() as *mut u8).add(BIG_HEADER_SIZE), mem::size_of::<usize>());
                    free(node.as_ptr() as *mut c_void);
                }
            }
        }
    }

    /// Iterate live big-object payload pointers, for marking.
    pub fn iter(&self) -> BigListIter {
        BigListIter { cur: self.head }
    }
}

pub struct BigListIter {
    cur: Option<NonNull<BigHeader>>,
}

impl Iterator for BigListIter {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cur?;
        unsafe {
            self.cur = (*node.as_ptr()).next;
            Some(NonNull::new_unchecked((node.as_ptr() as *mut u8).add(BIG_HEADER_SIZE)))
        }
    }
}

impl Drop for BigList {
    fn drop(&mut self) {
        let mut cur = self.head;
        unsafe {
            while let Some(node) = cur {
                let next = (*node.as_ptr()).next;
                free(node.as_ptr() as *mut c_void);
                cur = next;
            }
        }
    }
}
