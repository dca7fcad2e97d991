//! Lock-free data structures.

pub mod dynamic_array;

pub use dynamic_array::{GrowableArray, INITIAL_CAPACITY};
