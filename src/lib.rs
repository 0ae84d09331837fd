//! `cellmark`: a precise, non-moving, stop-the-world mark-and-sweep
//! collector for a typed heap of variably-sized cells.
//!
//! The collector itself knows nothing about the values it manages; a host
//! embeds it by implementing [`runtime::Tracer`] and [`runtime::RootSet`]
//! over its own object model and driving [`heap::Heap::allocate`]/
//! [`heap::Heap::collect`]. [`c_interface`] exposes the same two
//! capabilities as a flattened C ABI for non-Rust hosts.

extern crate bit_field;
extern crate libc;

pub mod big;
pub mod c_interface;
pub mod config;
pub mod error;
pub mod header;
pub mod heap;
pub mod mark;
pub mod page;
pub mod pool;
pub mod runtime;
pub mod size_class;
pub mod sweep;
