//! Fixed-capacity blocks of cells, chained by successor links.

use core::fmt::{self, Debug};
use core::mem;
use core::sync::atomic::Ordering::*;

use crossbeam_epoch::{unprotected, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

use super::cell::{Cell, Element, Read, State};

/// A power-of-two block of cells plus a link to its successor, which has twice the capacity.
///
/// The successor link is set at most once. A segment does not own its successor and does not
/// drop the elements in its cells; the array takes care of both.
pub(crate) struct Segment<T> {
    cells: Box<[Cell<T>]>,
    next: Atomic<Segment<T>>,
}

impl<T> Debug for Segment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment({})", self.capacity())
    }
}

impl<T> Segment<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            cells: (0..capacity).map(|_| Cell::default()).collect(),
            next: Atomic::null(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn successor<'g>(&self, guard: &'g Guard) -> Option<&'g Self> {
        // SAFETY: A successor is retired only after the array's cached pointer has moved past it,
        // which happens after `self` was retired. So it outlives any guard that can reach `self`.
        unsafe { self.next.load(Acquire, guard).as_ref() }
    }

    /// Links `new` as the successor.
    ///
    /// Returns `Ok` with the installed segment if this call won, or `Err` with the segment some
    /// other thread installed first. In the latter case `new` is dropped.
    pub(crate) fn install_successor<'g>(
        &self,
        new: Owned<Self>,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Self>, Shared<'g, Self>> {
        self.next
            .compare_exchange(Shared::null(), new, AcqRel, Acquire, guard)
            .map_err(|e| e.current)
    }

    /// Reads `index`, following successor links past migrated cells.
    ///
    /// Returns `None` if the chain does not hold `index` yet. The caller retries.
    pub(crate) fn get<'g>(&'g self, index: usize, guard: &'g Guard) -> Option<&'g T> {
        let mut segment = self;
        loop {
            if index >= segment.capacity() {
                segment = segment.successor(guard)?;
                continue;
            }
            match segment.cells[index].read(guard) {
                Read::Present(value) => return Some(value),
                Read::Absent => return None,
                Read::Forward => segment = segment.successor(guard)?,
            }
        }
    }

    /// Writes `index`, following successor links past migrated cells.
    ///
    /// A cell caught mid-migration is migrated first so the write lands in the successor after
    /// the value it replaces. Returns the element back if the chain does not reach `index` yet.
    pub(crate) fn put<'g>(
        &'g self,
        index: usize,
        mut elem: Owned<Element<T>>,
        guard: &'g Guard,
    ) -> Result<(), Owned<Element<T>>> {
        let backoff = Backoff::new();
        let mut segment = self;
        loop {
            if index >= segment.capacity() {
                let Some(next) = segment.successor(guard) else {
                    return Err(elem);
                };
                segment = next;
                continue;
            }

            let cell = &segment.cells[index];
            let state = cell.state(guard);
            match state {
                State::Empty | State::Value(_) => match cell.try_write(state, elem, guard) {
                    Ok(old) => {
                        if !old.is_null() {
                            // SAFETY: The CAS unlinked `old`, so no new reference to it can be made.
                            unsafe { guard.defer_destroy(old) };
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        elem = e;
                        backoff.spin();
                    }
                },
                State::Migrating(_) | State::Migrated => {
                    let Some(next) = segment.successor(guard) else {
                        return Err(elem);
                    };
                    segment.migrate_cell(index, next, guard);
                    segment = next;
                }
            }
        }
    }

    /// Empty -> Value at `index`. Hands the element back if the cell was not empty.
    pub(crate) fn try_append<'g>(
        &self,
        index: usize,
        elem: Owned<Element<T>>,
        guard: &'g Guard,
    ) -> Result<(), Owned<Element<T>>> {
        self.cells[index]
            .try_write(State::Empty, elem, guard)
            .map(|_| ())
    }

    /// Moves every live cell into `next`. Idempotent and safe to run from many threads at once.
    pub(crate) fn migrate_all(&self, next: &Self, guard: &Guard) {
        for index in 0..self.capacity() {
            self.migrate_cell(index, next, guard);
        }
    }

    /// Drives the cell at `index` to a terminal state. Empty cells are left alone.
    fn migrate_cell(&self, index: usize, next: &Self, guard: &Guard) {
        let cell = &self.cells[index];
        loop {
            match cell.state(guard) {
                State::Empty | State::Migrated => return,
                State::Value(elem) => {
                    // On failure either a put replaced `elem` or a helper marked it; reload.
                    let _ = cell.try_mark_migrating(elem, guard);
                }
                State::Migrating(elem) => {
                    // Fails if a helper already moved `elem`. The successor cell can't hold
                    // anything else until this cell is `Migrated`.
                    let _ = next.cells[index].try_install(elem, guard);
                    let _ = cell.try_mark_migrated(elem, guard);
                    return;
                }
            }
        }
    }

    /// Drops every element owned by this segment's cells.
    ///
    /// Requires exclusive access and no cell left `Migrating`.
    pub(crate) fn drop_elements(&mut self) {
        for cell in self.cells.iter_mut() {
            // SAFETY: Without `Migrating` cells each element has exactly one owning cell.
            unsafe { cell.drop_element() };
        }
    }

    /// Takes the successor link, leaving it null.
    pub(crate) fn take_successor(&mut self) -> Option<Box<Self>> {
        let next = mem::take(&mut self.next);
        // SAFETY: `&mut self` excludes concurrent access.
        if next.load(Relaxed, unsafe { unprotected() }).is_null() {
            return None;
        }
        // SAFETY: `&mut self` is exclusive and the successor is owned through this link only.
        Some(unsafe { next.into_owned() }.into_box())
    }
}
