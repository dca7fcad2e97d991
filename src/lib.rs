//! Lock-free growable array.

#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_op_in_unsafe_fn)]

mod adt;
mod error;
pub mod lockfree;

pub use adt::ConcurrentArray;
pub use error::IndexOutOfRange;
pub use lockfree::GrowableArray;
