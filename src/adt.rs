use crossbeam_epoch::Guard;

use crate::IndexOutOfRange;

/// Trait for a concurrent, append-only-growing indexed array.
pub trait ConcurrentArray<T> {
    /// Returns a reference to the element at `index`.
    ///
    /// Fails if `index` is not below the size observed at the call.
    fn get<'g>(&'g self, index: usize, guard: &'g Guard) -> Result<&'g T, IndexOutOfRange>;

    /// Overwrites the element at `index`.
    fn put(&self, index: usize, value: T, guard: &Guard) -> Result<(), IndexOutOfRange>;

    /// Appends `value` at the next index.
    fn push_back(&self, value: T, guard: &Guard);

    /// Returns the number of elements.
    fn size(&self) -> usize;
}
