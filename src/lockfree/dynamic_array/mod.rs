//! Lock-free growable array.

mod cell;
mod segment;

use core::fmt::{self, Debug};
use core::mem;
use core::sync::atomic::{AtomicUsize, Ordering::*};

use crossbeam_epoch::{unprotected, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use tracing::{debug, trace};

use self::cell::Element;
use self::segment::Segment;
use crate::{ConcurrentArray, IndexOutOfRange};

/// Capacity of the segment a new array starts with.
pub const INITIAL_CAPACITY: usize = 1;

/// Lock-free growable array.
///
/// Supports indexed reads and writes and amortized O(1) appends from any number of threads.
///
/// Elements live in a chain of segments whose capacities double: 1, 2, 4, ... When an append
/// finds the current segment full, it links a successor and *migrates* every cell into it. Any
/// thread that reaches a full segment helps with the same migration instead of waiting for the
/// thread that started it, so a stalled thread never blocks the others.
///
/// ```text
///   segment ─┐
///            v
///          +---+        +---+---+        +---+---+---+---+
///          | M | -next->| M | M | -next->| a | b | c | - |
///          +---+        +---+---+        +---+---+---+---+
///
///   size = 3, M = migrated, - = empty
/// ```
///
/// `segment` is only a cache of where the live cells are. Operations that start from an older
/// segment find their way forward through migrated cells.
///
/// Every index below an observed `size()` holds a value: an append writes its cell first and
/// only then advances `size`.
pub struct GrowableArray<T> {
    segment: CachePadded<Atomic<Segment<T>>>,
    size: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for GrowableArray<T> {}
unsafe impl<T: Send + Sync> Sync for GrowableArray<T> {}

impl<T> Default for GrowableArray<T> {
    fn default() -> Self {
        Self {
            segment: CachePadded::new(Atomic::new(Segment::new(INITIAL_CAPACITY))),
            size: CachePadded::new(AtomicUsize::new(0)),
        }
    }
}

impl<T> GrowableArray<T> {
    /// Creates a new, empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of elements.
    pub fn size(&self) -> usize {
        self.size.load(Acquire)
    }

    /// Returns `true` if nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the capacity of the segment currently cached as active.
    ///
    /// This is a hint. Elements may already live in a larger successor.
    pub fn capacity(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        self.current(guard).capacity()
    }

    fn current<'g>(&self, guard: &'g Guard) -> &'g Segment<T> {
        // SAFETY: The pointer is never null, and a segment is retired only by the thread that
        // moves the pointer past it.
        unsafe { self.segment.load(Acquire, guard).deref() }
    }

    fn check_bounds(&self, index: usize) -> Result<(), IndexOutOfRange> {
        let size = self.size();
        if index < size {
            Ok(())
        } else {
            Err(IndexOutOfRange { index, size })
        }
    }

    /// Returns a reference to the element at `index`.
    pub fn get<'g>(&'g self, index: usize, guard: &'g Guard) -> Result<&'g T, IndexOutOfRange> {
        self.check_bounds(index)?;

        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.current(guard).get(index, guard) {
                return Ok(value);
            }
            backoff.snooze();
        }
    }

    /// Overwrites the element at `index`. The old element is dropped once no thread can see it.
    pub fn put(&self, index: usize, value: T, guard: &Guard) -> Result<(), IndexOutOfRange> {
        self.check_bounds(index)?;

        let mut elem = Element::new(value);
        let backoff = Backoff::new();
        loop {
            match self.current(guard).put(index, elem, guard) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    elem = e;
                    backoff.snooze();
                }
            }
        }
    }

    /// Appends `value` at index `size()`.
    pub fn push_back(&self, value: T, guard: &Guard) {
        let mut elem = Element::new(value);
        let backoff = Backoff::new();
        loop {
            let segment = self.segment.load(Acquire, guard);
            let size = self.size.load(Acquire);

            // SAFETY: See `current`.
            let segment_ref = unsafe { segment.deref() };
            if size >= segment_ref.capacity() {
                self.grow(segment, guard);
                continue;
            }

            match segment_ref.try_append(size, elem, guard) {
                Ok(()) => {
                    // Fails only if a peer already committed our index.
                    let _ = self
                        .size
                        .compare_exchange(size, size + 1, AcqRel, Acquire);
                    return;
                }
                Err(e) => {
                    elem = e;
                    // Index `size` is written but maybe not committed. Commit it for its owner.
                    if self
                        .size
                        .compare_exchange(size, size + 1, AcqRel, Acquire)
                        .is_ok()
                    {
                        trace!(index = size, "committed a concurrent append");
                    }
                    backoff.spin();
                }
            }
        }
    }

    /// Moves the array past the full `segment`: links a successor if there is none, migrates into
    /// it, and advances the cached pointer.
    fn grow<'g>(&self, segment: Shared<'g, Segment<T>>, guard: &'g Guard) {
        // SAFETY: See `current`.
        let segment_ref = unsafe { segment.deref() };

        let next = match segment_ref.successor(guard) {
            Some(next) => next,
            None => {
                let capacity = segment_ref
                    .capacity()
                    .checked_mul(2)
                    .expect("capacity overflow");
                let next = match segment_ref
                    .install_successor(Owned::new(Segment::new(capacity)), guard)
                {
                    Ok(next) => {
                        debug!(
                            from = segment_ref.capacity(),
                            to = capacity,
                            "installed successor segment"
                        );
                        next
                    }
                    Err(next) => {
                        trace!(capacity = capacity, "lost the successor race, helping migration");
                        next
                    }
                };
                // SAFETY: Just loaded from the successor link; see `Segment::successor`.
                unsafe { next.deref() }
            }
        };

        segment_ref.migrate_all(next, guard);

        if self
            .segment
            .compare_exchange(
                segment,
                Shared::from(next as *const _),
                AcqRel,
                Acquire,
                guard,
            )
            .is_ok()
        {
            debug!(capacity = next.capacity(), "advanced to successor segment");
            // SAFETY: Every cell of `segment` is migrated and the cached pointer has moved on, so
            // new operations can't reach it. Threads already inside are protected by their guards.
            unsafe { guard.defer_destroy(segment) };
        }
    }
}

impl<T> ConcurrentArray<T> for GrowableArray<T> {
    fn get<'g>(&'g self, index: usize, guard: &'g Guard) -> Result<&'g T, IndexOutOfRange> {
        GrowableArray::get(self, index, guard)
    }

    fn put(&self, index: usize, value: T, guard: &Guard) -> Result<(), IndexOutOfRange> {
        GrowableArray::put(self, index, value, guard)
    }

    fn push_back(&self, value: T, guard: &Guard) {
        GrowableArray::push_back(self, value, guard)
    }

    fn size(&self) -> usize {
        GrowableArray::size(self)
    }
}

impl<T> Debug for GrowableArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableArray")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> Drop for GrowableArray<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` excludes every other thread.
        let guard = unsafe { unprotected() };

        // SAFETY: The cached pointer is never null and owns the head of the live chain.
        let mut segment = unsafe { mem::take(&mut *self.segment).into_owned() }.into_box();

        // A panicking thread may have left a migration unfinished. Finish it so that each element
        // is owned by exactly one cell.
        loop {
            let Some(next) = segment.successor(guard) else {
                break;
            };
            segment.migrate_all(next, guard);
            let Some(next) = segment.take_successor() else {
                break;
            };
            segment = next;
        }

        segment.drop_elements();
    }
}
