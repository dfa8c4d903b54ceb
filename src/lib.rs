//! weak-registry: observer registries that hold their items weakly and
//! stay usable while they are being iterated.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep listener/callback lists that never extend the lifetime of
//!   the objects registered in them, and that callbacks may mutate while
//!   the list is being walked.
//! - Layers:
//!   - Slot<T>: a lookup-only handle to an `Arc<T>` with `try_resolve()`
//!     and identity comparison. `Weak` by default; `Strong` for lists that
//!     must keep their items.
//!   - ReferenceList<T>: ordered slots plus two staging buffers that absorb
//!     mutations made during an iteration pass.
//!   - ReferenceMap<K, T>: per-key ReferenceLists with bucket recycling and
//!     an aggregate empty/non-empty listener.
//!   - utils: free functions over raw `Vec<Slot<T>>` lists and maps of them.
//!   - JobList: deferred callbacks flushed once a condition holds.
//!
//! Constraints
//! - Items are compared by allocation identity, never by `PartialEq`.
//! - A reclaimed item disappears lazily: it is skipped by iteration and
//!   purged by `is_empty` or by add-time sweeps. No eager notification.
//! - Iteration is newest to oldest and never yields an item added during
//!   the same pass.
//!
//! Iteration passes
//! - `ReferenceList::iter` marks the list as iterating. While the flag is
//!   set, `add`/`remove`/`clear` go to `pending_adds`/`pending_removes` and
//!   the committed slot vector keeps its length, so the pass can walk it by
//!   index without holding the lock between items.
//! - A staged removal hides the item for the rest of the pass. A staged
//!   addition shows up on the next pass.
//! - The pass ends when the iterator is exhausted or dropped. Staged
//!   removals are applied first, then staged additions are appended.
//! - Lists built with `thread_safe(true)` serialize passes across threads
//!   through a binary gate. A second pass from the thread that holds the
//!   gate fails with `IterError::Reentrant` instead of deadlocking; waiting
//!   threads can be woken with `IterError::Interrupted`. Lists that are not
//!   thread-safe fail a concurrent pass with `IterError::AlreadyIterating`.
//! - A pass belongs to the thread that started it: `Iter` and `BucketIter`
//!   are `!Send`, matching the gate's notion of holder.
//!
//! Locking and reentrancy
//! - Each structure owns one `parking_lot::ReentrantMutex<RefCell<_>>`.
//!   Listeners and jobs run with the lock held but never inside a `RefCell`
//!   borrow, so they may call back into the structure from the same thread.
//! - Lock order is map, then bucket, then the map's aggregate counter.
//! - The gate is a separate `Mutex` + `Condvar`; the crate never takes it
//!   while holding a structure lock.
//!
//! Fullness
//! - A list reports `true` when its committed slot vector becomes non-empty
//!   and `false` when it becomes empty. Checks run only at safe points
//!   (outside a pass, or when a pass ends), so churn within a pass is
//!   invisible to listeners.
//! - A map counts full buckets and reports only 0 <-> 1 transitions.
//!
//! Notes and non-goals
//! - No eager cleanup thread; reclaimed slots cost memory until touched.
//! - No timeouts on the gate: an unfinished iterator holds it.

mod error;
mod jobs;
mod list;
mod map;
mod reentrancy;
pub mod slot;
pub mod utils;

// Public surface
pub use error::IterError;
pub use jobs::{Job, JobList};
pub use list::{FullnessListener, Iter, Options, ReferenceList};
pub use map::{BucketIter, MapOptions, ReferenceLongMap, ReferenceMap};
pub use slot::{Slot, SlotKind};
