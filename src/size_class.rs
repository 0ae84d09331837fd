//! The small-object size-class table (SPEC_FULL §3/§4.1).
//!
//! Narrowed from Neptune's 41-entry, Julia-derived `GC_SIZE_CLASSES` table
//! down to the 16 classes this design specifies; the flat decision tree
//! shape (rather than a binary search) is kept from Neptune's `find_pool`.

/// Number of small-object pools.
pub const N_POOLS: usize = 16;

/// Largest request size handled by the pool allocator; anything larger
/// takes the big-object path.
pub const MAX_SMALL_SIZE: usize = 2048;

/// Nominal payload size, in bytes, of each of the 16 pools.
pub const SIZE_CLASSES: [usize; N_POOLS] = [
    8, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048,
];

/// Map a request size in `1..=MAX_SMALL_SIZE` to a pool index.
///
/// Undefined (must not be called) for `sz == 0` or `sz > MAX_SMALL_SIZE`;
/// callers route those through `alloc_big` instead.
#[inline]
pub fn szclass(sz: usize) -> usize {
    debug_assert!(sz >= 1 && sz <= MAX_SMALL_SIZE, "szclass called out of range: {}", sz);
    match SIZE_CLASSES.iter().position(|&class| sz <= class) {
        Some(i) => i,
        None => unreachable!("szclass called with sz > MAX_SMALL_SIZE"),
    }
}
