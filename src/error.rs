//! Errors reported by the array.

use thiserror::Error;

/// The index passed to `get` or `put` was not below the array's size at the time of the call.
///
/// The array may have grown since. Callers that want to retry should re-read `size()` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("index {index} out of range for array of size {size}")]
pub struct IndexOutOfRange {
    /// The rejected index.
    pub index: usize,
    /// The size observed by the bound check.
    pub size: usize,
}
