//! ReferenceList: ordered registry of weakly-held items that can be mutated
//! while it is being iterated.
//!
//! Mutations requested during a pass go to two staging buffers
//! (`pending_adds`, `pending_removes`) and are reconciled into the committed
//! sequence when the pass ends. The committed sequence never changes length
//! while a pass is active, so a pass walks it by index without holding the
//! lock between items.

use crate::error::IterError;
use crate::reentrancy::IterationGate;
use crate::slot::{Slot, SlotKind};
use crate::utils;
use core::cell::RefCell;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::Arc;

/// Callback invoked with `true` when a registry goes from empty to
/// non-empty and `false` on the way back.
pub type FullnessListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Construction options for [`ReferenceList`].
#[derive(Clone, Default)]
pub struct Options {
    pub(crate) thread_safe: bool,
    pub(crate) slot_kind: SlotKind,
    pub(crate) on_fullness: Option<FullnessListener>,
}

impl Options {
    /// Serialize iteration passes across threads instead of failing.
    pub fn thread_safe(mut self, yes: bool) -> Self {
        self.thread_safe = yes;
        self
    }

    pub fn slot_kind(mut self, kind: SlotKind) -> Self {
        self.slot_kind = kind;
        self
    }

    pub fn on_fullness<F>(mut self, f: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.on_fullness = Some(Arc::new(f));
        self
    }

    pub(crate) fn with_listener(mut self, listener: Option<FullnessListener>) -> Self {
        self.on_fullness = listener;
        self
    }
}

impl core::fmt::Debug for Options {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Options")
            .field("thread_safe", &self.thread_safe)
            .field("slot_kind", &self.slot_kind)
            .field("on_fullness", &self.on_fullness.is_some())
            .finish()
    }
}

struct State<T: ?Sized> {
    items: Vec<Slot<T>>, // newest last
    pending_adds: Vec<Slot<T>>,
    pending_removes: Vec<Slot<T>>,
    iterating: bool,
    full: bool,
}

impl<T: ?Sized> State<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            pending_adds: Vec::new(),
            pending_removes: Vec::new(),
            iterating: false,
            full: false,
        }
    }

    fn index_of(&self, item: &Arc<T>) -> Option<usize> {
        self.items.iter().rposition(|s| s.refers_to(item))
    }

    fn is_pending_remove(&self, slot: &Slot<T>) -> bool {
        self.pending_removes.iter().any(|r| r.same_slot(slot))
    }

    fn visible(&self) -> impl Iterator<Item = &Slot<T>> + '_ {
        self.items
            .iter()
            .filter(move |s| s.is_live() && !self.is_pending_remove(s))
    }

    fn visible_len(&self) -> usize {
        self.visible().count() + self.pending_adds.iter().filter(|s| s.is_live()).count()
    }
}

/// Thread-tolerant registry of weakly-held items.
///
/// All methods may be called from any thread and from inside an iteration
/// pass. `iter` yields newest items first; see [`ReferenceList::iter`] for
/// the pass contract.
pub struct ReferenceList<T: ?Sized> {
    state: ReentrantMutex<RefCell<State<T>>>,
    gate: Option<IterationGate>,
    slot_kind: SlotKind,
    on_fullness: Option<FullnessListener>,
}

type Guard<'a, T> = ReentrantMutexGuard<'a, RefCell<State<T>>>;

impl<T: ?Sized> ReferenceList<T> {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(State::new())),
            gate: options.thread_safe.then(IterationGate::new),
            slot_kind: options.slot_kind,
            on_fullness: options.on_fullness,
        }
    }

    pub fn is_thread_safe(&self) -> bool {
        self.gate.is_some()
    }

    pub fn slot_kind(&self) -> SlotKind {
        self.slot_kind
    }

    // Report an emptiness transition to the listener. Runs under the
    // re-entrant lock but outside any `RefCell` borrow.
    fn check_full(&self, guard: &Guard<'_, T>) {
        let Some(listener) = &self.on_fullness else {
            return;
        };
        let change = {
            let mut st = guard.borrow_mut();
            let full = !st.items.is_empty();
            if st.full == full {
                None
            } else {
                st.full = full;
                Some(full)
            }
        };
        if let Some(full) = change {
            listener(full);
        }
    }

    /// Add `item` unless it is already present. Returns false if it was.
    ///
    /// During a pass the addition is staged and becomes visible on the
    /// next pass. Re-adding an item whose removal is staged cancels the
    /// removal.
    pub fn add(&self, item: &Arc<T>) -> bool {
        let guard = self.state.lock();
        {
            let mut st = guard.borrow_mut();
            let st = &mut *st;
            if st.iterating {
                return match st.index_of(item) {
                    Some(i) => {
                        let slot = &st.items[i];
                        let before = st.pending_removes.len();
                        st.pending_removes.retain(|r| !r.same_slot(slot));
                        st.pending_removes.len() != before
                    }
                    None => utils::add_slot_with(self.slot_kind, &mut st.pending_adds, item),
                };
            }
            if st.index_of(item).is_some() {
                return false;
            }
            st.items.push(self.slot_kind.make(item));
        }
        self.check_full(&guard);
        true
    }

    /// Add every visible item of `other`, oldest first, followed by the
    /// additions staged by a pass running on `other`. Returns how many were
    /// newly added.
    pub fn add_all(&self, other: &ReferenceList<T>) -> usize {
        if core::ptr::eq(self, other) {
            return 0;
        }
        other
            .carried_items()
            .iter()
            .filter(|item| self.add(item))
            .count()
    }

    // Everything a pass ending now would leave behind, oldest first.
    fn carried_items(&self) -> Vec<Arc<T>> {
        let guard = self.state.lock();
        let st = guard.borrow();
        let staged = st.pending_adds.iter().filter_map(Slot::try_resolve);
        let items: Vec<Arc<T>> = st
            .visible()
            .filter_map(Slot::try_resolve)
            .chain(staged)
            .collect();
        items
    }

    /// Remove `item` by identity. Returns false if it was not present.
    ///
    /// During a pass the removal is staged; the item is skipped for the
    /// rest of the pass and dropped when the pass ends.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let guard = self.state.lock();
        let removed = {
            let mut st = guard.borrow_mut();
            let st = &mut *st;
            if st.iterating {
                return match st.index_of(item) {
                    Some(i) => {
                        let slot = st.items[i].clone();
                        if st.is_pending_remove(&slot) {
                            false
                        } else {
                            st.pending_removes.push(slot);
                            true
                        }
                    }
                    None => utils::remove_slot(&mut st.pending_adds, item),
                };
            }
            match st.index_of(item) {
                Some(i) => st.items.remove(i),
                None => return false,
            }
        };
        self.check_full(&guard);
        drop(guard);
        drop(removed);
        true
    }

    /// Remove every item. During a pass all committed items are staged for
    /// removal and staged additions are discarded.
    pub fn clear(&self) {
        let guard = self.state.lock();
        let (removed, staged) = {
            let mut st = guard.borrow_mut();
            let st = &mut *st;
            if st.iterating {
                let staged: Vec<Slot<T>> = st
                    .items
                    .iter()
                    .filter(|s| !st.is_pending_remove(s))
                    .cloned()
                    .collect();
                st.pending_removes.extend(staged);
                (core::mem::take(&mut st.pending_adds), true)
            } else {
                (core::mem::take(&mut st.items), false)
            }
        };
        if !staged {
            self.check_full(&guard);
        }
        drop(guard);
        drop(removed);
    }

    /// True if no item is visible. Outside a pass this first purges slots
    /// whose item has been reclaimed.
    pub fn is_empty(&self) -> bool {
        let guard = self.state.lock();
        {
            let mut st = guard.borrow_mut();
            if st.iterating {
                return st.visible_len() == 0;
            }
            utils::purge_reclaimed(&mut st.items);
        }
        self.check_full(&guard);
        let empty = guard.borrow().items.is_empty();
        empty
    }

    /// True if any slot is held, live or not, committed or staged.
    pub fn has_references(&self) -> bool {
        let guard = self.state.lock();
        let st = guard.borrow();
        !st.items.is_empty() || (st.iterating && !st.pending_adds.is_empty())
    }

    /// Number of live items a new pass would see.
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().visible_len();
        len
    }

    /// Live, visible committed items, newest first. Does not take the
    /// iteration gate.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let guard = self.state.lock();
        let st = guard.borrow();
        let mut out: Vec<Arc<T>> = st.visible().filter_map(Slot::try_resolve).collect();
        out.reverse();
        out
    }

    /// Start an iteration pass, newest to oldest.
    ///
    /// The pass skips reclaimed items and items whose removal was requested
    /// during the pass. Items added during the pass are not yielded. The pass
    /// ends when the iterator is exhausted or dropped; staged mutations are
    /// applied then.
    ///
    /// Errors: `AlreadyIterating` if a pass is active on a list that is not
    /// thread-safe; `Reentrant` if the current thread already runs a pass on
    /// a thread-safe list; `Interrupted` if `interrupt_waiters` woke this
    /// call while it waited for another thread's pass.
    pub fn iter(&self) -> Result<Iter<'_, T>, IterError> {
        let cursor = self.begin_pass()?;
        Ok(Iter {
            list: self,
            cursor,
            _nosend: PhantomData,
        })
    }

    /// Wake threads blocked in `iter` on this list; they fail with
    /// `IterError::Interrupted`.
    pub fn interrupt_waiters(&self) {
        if let Some(gate) = &self.gate {
            gate.interrupt();
        }
    }

    pub(crate) fn begin_pass(&self) -> Result<Cursor, IterError> {
        if let Some(gate) = &self.gate {
            gate.acquire()?;
        }
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if st.iterating {
            drop(st);
            drop(guard);
            if let Some(gate) = &self.gate {
                gate.release();
            }
            return Err(IterError::AlreadyIterating);
        }
        st.iterating = true;
        tracing::trace!(items = st.items.len(), "reference list pass started");
        Ok(Cursor {
            index: st.items.len(),
            done: false,
        })
    }

    fn end_pass(&self) {
        let guard = self.state.lock();
        let dropped = {
            let mut st = guard.borrow_mut();
            let st = &mut *st;
            assert!(st.iterating, "iteration pass ended twice");
            st.iterating = false;
            let removes = core::mem::take(&mut st.pending_removes);
            let adds = core::mem::take(&mut st.pending_adds);
            let (keep, dropped): (Vec<_>, Vec<_>) = st
                .items
                .drain(..)
                .partition(|s| !removes.iter().any(|r| r.same_slot(s)));
            st.items = keep;
            let added = adds.len();
            st.items.extend(adds.into_iter().filter(Slot::is_live));
            tracing::trace!(
                removed = dropped.len(),
                added,
                items = st.items.len(),
                "reference list pass reconciled"
            );
            (dropped, removes)
        };
        self.check_full(&guard);
        drop(guard);
        drop(dropped);
        if let Some(gate) = &self.gate {
            gate.release();
        }
    }
}

impl<T: ?Sized> Default for ReferenceList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> core::fmt::Debug for ReferenceList<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReferenceList")
            .field("len", &self.len())
            .field("thread_safe", &self.is_thread_safe())
            .field("slot_kind", &self.slot_kind)
            .finish()
    }
}

/// Position of one iteration pass over a list's committed slots.
pub(crate) struct Cursor {
    index: usize,
    done: bool,
}

impl Cursor {
    pub(crate) fn advance<T: ?Sized>(&mut self, list: &ReferenceList<T>) -> Option<Arc<T>> {
        if self.done {
            return None;
        }
        let found = {
            let guard = list.state.lock();
            let st = guard.borrow();
            let mut found = None;
            while self.index > 0 {
                self.index -= 1;
                let slot = &st.items[self.index];
                if st.is_pending_remove(slot) {
                    continue;
                }
                if let Some(item) = slot.try_resolve() {
                    found = Some(item);
                    break;
                }
            }
            found
        };
        if found.is_none() {
            self.finish(list);
        }
        found
    }

    pub(crate) fn finish<T: ?Sized>(&mut self, list: &ReferenceList<T>) {
        if !self.done {
            self.done = true;
            list.end_pass();
        }
    }
}

/// One iteration pass over a [`ReferenceList`]. Dropping it ends the pass.
///
/// The pass belongs to the thread that started it, so the iterator cannot
/// be sent to another thread:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use weak_registry::{Options, ReferenceList};
///
/// let list = ReferenceList::with_options(Options::default().thread_safe(true));
/// let item = Arc::new(1);
/// list.add(&item);
/// let it = list.iter().unwrap();
/// std::thread::scope(|s| {
///     s.spawn(move || drop(it));
/// });
/// ```
pub struct Iter<'a, T: ?Sized> {
    list: &'a ReferenceList<T>,
    cursor: Cursor,
    // The gate records the starting thread as holder.
    _nosend: PhantomData<*mut ()>,
}

impl<'a, T: ?Sized> Iterator for Iter<'a, T> {
    type Item = Arc<T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.list)
    }
}

impl<'a, T: ?Sized> FusedIterator for Iter<'a, T> {}

impl<'a, T: ?Sized> Drop for Iter<'a, T> {
    fn drop(&mut self) {
        self.cursor.finish(self.list);
    }
}
