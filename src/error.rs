//! Fatal-error policy (SPEC_FULL §7). By construction, a correct runtime and
//! a healthy OS cannot trigger any of these; all three are bugs, not
//! recoverable conditions, so there is no `Result` to propagate.
//!
//! Grounded on Neptune's `panic!("GC: Out of memory")` / `panic!("GC: out of
//! memory: no regions left!")` call sites (`neptune/src/pages.rs`,
//! `neptune/src/gc2.rs`) and its `np_corruption_fail` assertion path
//! (`neptune/src/c_interface.rs`).

use std::fmt;

/// The three fatal conditions the collector can detect in itself.
#[derive(Debug)]
pub enum GcError {
    /// The page source or the big-object allocator failed to provide memory.
    OutOfMemory,
    /// A cell encountered during sweep has neither a valid free encoding nor
    /// a valid live encoding.
    CorruptHeader,
    /// `mark` was invoked with a null payload.
    TraceIntoNull,
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            GcError::OutOfMemory => "out of memory",
            GcError::CorruptHeader => "corrupt cell header during sweep",
            GcError::TraceIntoNull => "mark() invoked with a null payload",
        };
        f.write_str(msg)
    }
}

/// Print a diagnostic and abort the process immediately.
///
/// Uses `process::abort()` rather than `panic!` so that the "no partial
/// state observable" requirement holds even if the embedding process has
/// installed a panic hook that does not unwind straight to abort.
#[cold]
#[inline(never)]
pub fn fatal(msg: &str) -> ! {
    eprintln!("cellmark: fatal: {}", msg);
    std::process::abort();
}

/// Like `fatal`, but tagged with which `GcError` case triggered it.
#[cold]
#[inline(never)]
pub fn fatal_with(err: GcError, detail: &str) -> ! {
    eprintln!("cellmark: fatal: {} ({})", err, detail);
    std::process::abort();
}
