//! Tagged slot of a segment.

use core::sync::atomic::Ordering::*;

use crossbeam_epoch::{unprotected, Atomic, Guard, Owned, Shared};

const LIVE: usize = 0;
const MIGRATING: usize = 1;
const MIGRATED: usize = 2;

/// Heap box holding one stored element.
///
/// Over-aligned so that a pointer to it has two free low bits for the cell tag.
#[derive(Debug)]
#[repr(align(4))]
pub(crate) struct Element<T> {
    value: T,
}

impl<T> Element<T> {
    pub(crate) fn new(value: T) -> Owned<Self> {
        Owned::new(Self { value })
    }
}

/// Decoded state of a [`Cell`].
///
/// The pointers carried by `Value` and `Migrating` are untagged.
#[derive(Debug)]
pub(crate) enum State<'g, T> {
    Empty,
    Value(Shared<'g, Element<T>>),
    Migrating(Shared<'g, Element<T>>),
    Migrated,
}

impl<T> Clone for State<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for State<'_, T> {}

/// Result of reading a cell.
#[derive(Debug)]
pub(crate) enum Read<'g, T> {
    Present(&'g T),
    /// Never written.
    Absent,
    /// The value lives in the successor segment.
    Forward,
}

/// A single slot of a segment.
///
/// The slot is one atomic pointer whose tag encodes the state:
///
/// | tag         | pointer  | state          |
/// |-------------|----------|----------------|
/// | `LIVE`      | null     | `Empty`        |
/// | `LIVE`      | non-null | `Value(v)`     |
/// | `MIGRATING` | non-null | `Migrating(v)` |
/// | `MIGRATED`  | null     | `Migrated`     |
///
/// Transitions only go Empty -> Value -> Migrating -> Migrated, plus overwriting a `Value`.
///
/// Dropping a cell does not drop its element. Ownership of elements moves between segments
/// during migration, so the array frees them explicitly.
#[derive(Debug)]
pub(crate) struct Cell<T> {
    slot: Atomic<Element<T>>,
}

impl<T> Default for Cell<T> {
    fn default() -> Self {
        Self {
            slot: Atomic::null(),
        }
    }
}

impl<T> Cell<T> {
    pub(crate) fn state<'g>(&self, guard: &'g Guard) -> State<'g, T> {
        let ptr = self.slot.load(Acquire, guard);
        match ptr.tag() {
            LIVE if ptr.is_null() => State::Empty,
            LIVE => State::Value(ptr),
            MIGRATING => State::Migrating(ptr.with_tag(LIVE)),
            _ => State::Migrated,
        }
    }

    pub(crate) fn read<'g>(&self, guard: &'g Guard) -> Read<'g, T> {
        match self.state(guard) {
            State::Empty => Read::Absent,
            // SAFETY: A non-null element is retired only after it has been unlinked from every
            // cell, and `guard` was pinned before the load.
            State::Value(elem) | State::Migrating(elem) => {
                Read::Present(&unsafe { elem.deref() }.value)
            }
            State::Migrated => Read::Forward,
        }
    }

    /// Empty -> Value(new), or Value(old) -> Value(new).
    ///
    /// `expected` is the state the caller observed. On success returns the replaced element,
    /// which is null if the cell was empty. Fails without touching the cell if the current state
    /// differs or migration has begun.
    pub(crate) fn try_write<'g>(
        &self,
        expected: State<'g, T>,
        new: Owned<Element<T>>,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Element<T>>, Owned<Element<T>>> {
        let current = match expected {
            State::Empty => Shared::null(),
            State::Value(elem) => elem,
            State::Migrating(_) | State::Migrated => return Err(new),
        };
        self.slot
            .compare_exchange(current, new, AcqRel, Acquire, guard)
            .map(|_| current)
            .map_err(|e| e.new)
    }

    /// Empty -> Value(elem) without allocating. Used to move an element into a successor.
    pub(crate) fn try_install(&self, elem: Shared<'_, Element<T>>, guard: &Guard) -> bool {
        self.slot
            .compare_exchange(Shared::null(), elem.with_tag(LIVE), AcqRel, Acquire, guard)
            .is_ok()
    }

    /// Value(elem) -> Migrating(elem).
    pub(crate) fn try_mark_migrating(&self, elem: Shared<'_, Element<T>>, guard: &Guard) -> bool {
        self.slot
            .compare_exchange(
                elem.with_tag(LIVE),
                elem.with_tag(MIGRATING),
                AcqRel,
                Acquire,
                guard,
            )
            .is_ok()
    }

    /// Migrating(elem) -> Migrated.
    ///
    /// Only call once `elem` (or a later overwrite of it) is visible in the successor's cell.
    pub(crate) fn try_mark_migrated(&self, elem: Shared<'_, Element<T>>, guard: &Guard) -> bool {
        self.slot
            .compare_exchange(
                elem.with_tag(MIGRATING),
                Shared::null().with_tag(MIGRATED),
                AcqRel,
                Acquire,
                guard,
            )
            .is_ok()
    }

    /// Drops the element this cell owns, if any.
    ///
    /// # Safety
    ///
    /// No other cell may own the same element. A `Migrating` cell shares its element with the
    /// successor, so migration must be finished first.
    pub(crate) unsafe fn drop_element(&mut self) {
        // SAFETY: `&mut self` excludes concurrent access.
        let guard = unsafe { unprotected() };
        if let State::Value(elem) = self.state(guard) {
            // SAFETY: The caller guarantees this cell is the sole owner.
            drop(unsafe { elem.into_owned() });
        }
        self.slot = Atomic::null();
    }
}
