//! ReferenceMap: per-key ReferenceLists with bucket recycling and an
//! aggregate fullness listener.

use crate::error::IterError;
use crate::list::{Cursor, FullnessListener, Options, ReferenceList};
use crate::slot::SlotKind;
use core::cell::{Cell, RefCell};
use core::hash::Hash;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use hashbrown::HashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::Arc;

/// Construction options for [`ReferenceMap`]. Every bucket is created with
/// the `thread_safe` flag and slot kind given here.
#[derive(Clone, Default)]
pub struct MapOptions {
    thread_safe: bool,
    slot_kind: SlotKind,
    on_fullness: Option<FullnessListener>,
}

impl MapOptions {
    pub fn thread_safe(mut self, yes: bool) -> Self {
        self.thread_safe = yes;
        self
    }

    pub fn slot_kind(mut self, kind: SlotKind) -> Self {
        self.slot_kind = kind;
        self
    }

    /// Called with `true` when the first bucket becomes non-empty and with
    /// `false` when the last non-empty bucket empties.
    pub fn on_fullness<F>(mut self, f: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.on_fullness = Some(Arc::new(f));
        self
    }
}

impl core::fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MapOptions")
            .field("thread_safe", &self.thread_safe)
            .field("slot_kind", &self.slot_kind)
            .field("on_fullness", &self.on_fullness.is_some())
            .finish()
    }
}

// Counts non-empty buckets and reports 0 <-> 1 transitions.
struct Aggregate {
    full_buckets: ReentrantMutex<Cell<usize>>,
    listener: FullnessListener,
}

impl Aggregate {
    fn on_bucket(&self, full: bool) {
        let count = self.full_buckets.lock();
        let n = count.get();
        if full {
            count.set(n + 1);
            if n == 0 {
                (self.listener)(true);
            }
        } else {
            assert!(n > 0, "full bucket count underflow");
            count.set(n - 1);
            if n == 1 {
                (self.listener)(false);
            }
        }
    }
}

struct MapState<K, T: ?Sized> {
    buckets: HashMap<K, Arc<ReferenceList<T>>>,
    reuse: Vec<Arc<ReferenceList<T>>>,
}

/// Key-bucketed registry built on [`ReferenceList`].
///
/// A bucket is created on the first `add` for its key and recycled once it
/// empties. Recycled buckets are handed to the next new key.
pub struct ReferenceMap<K, T: ?Sized> {
    state: ReentrantMutex<RefCell<MapState<K, T>>>,
    bucket_options: Options,
}

/// `ReferenceMap` keyed by 64-bit ids.
pub type ReferenceLongMap<T> = ReferenceMap<i64, T>;

type Guard<'a, K, T> = ReentrantMutexGuard<'a, RefCell<MapState<K, T>>>;

impl<K, T> ReferenceMap<K, T>
where
    K: Eq + Hash,
    T: ?Sized,
{
    pub fn new() -> Self {
        Self::with_options(MapOptions::default())
    }

    pub fn with_options(options: MapOptions) -> Self {
        let helper = options.on_fullness.map(|listener| {
            let aggregate = Aggregate {
                full_buckets: ReentrantMutex::new(Cell::new(0)),
                listener,
            };
            Arc::new(move |full: bool| aggregate.on_bucket(full)) as FullnessListener
        });
        Self {
            state: ReentrantMutex::new(RefCell::new(MapState {
                buckets: HashMap::new(),
                reuse: Vec::new(),
            })),
            bucket_options: Options::default()
                .thread_safe(options.thread_safe)
                .slot_kind(options.slot_kind)
                .with_listener(helper),
        }
    }

    /// Number of keys that currently own a bucket.
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().buckets.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `item` under `key`. Returns false if it was already present.
    pub fn add(&self, key: K, item: &Arc<T>) -> bool {
        let guard = self.state.lock();
        let bucket = {
            let mut st = guard.borrow_mut();
            let st = &mut *st;
            let reuse = &mut st.reuse;
            let options = &self.bucket_options;
            st.buckets
                .entry(key)
                .or_insert_with(|| {
                    reuse
                        .pop()
                        .unwrap_or_else(|| Arc::new(ReferenceList::with_options(options.clone())))
                })
                .clone()
        };
        bucket.add(item)
    }

    /// True iff `key` has a bucket with at least one visible item.
    pub fn has(&self, key: &K) -> bool {
        let guard = self.state.lock();
        let Some(bucket) = guard.borrow().buckets.get(key).cloned() else {
            return false;
        };
        !bucket.is_empty()
    }

    /// Remove `item` from `key`'s bucket, recycling the bucket if it empties.
    pub fn remove(&self, key: &K, item: &Arc<T>) -> bool {
        let guard = self.state.lock();
        let Some(bucket) = guard.borrow().buckets.get(key).cloned() else {
            return false;
        };
        let removed = bucket.remove(item);
        let empty = bucket.is_empty();
        drop(bucket);
        if empty {
            let detached = guard.borrow_mut().buckets.remove(key);
            if let Some(bucket) = detached {
                self.recycle(&guard, bucket);
            }
        }
        removed
    }

    /// Move every item registered under `old` to `new`.
    pub fn move_key(&self, old: &K, new: K) {
        let guard = self.state.lock();
        let Some(source) = guard.borrow_mut().buckets.remove(old) else {
            return;
        };
        let target = guard.borrow().buckets.get(&new).cloned();
        match target {
            None => {
                guard.borrow_mut().buckets.insert(new, source);
            }
            Some(target) => {
                target.add_all(&source);
                source.clear();
                self.recycle(&guard, source);
            }
        }
    }

    /// Clear and recycle every bucket.
    pub fn clear(&self) {
        let guard = self.state.lock();
        let drained: Vec<_> = guard
            .borrow_mut()
            .buckets
            .drain()
            .map(|(_, bucket)| bucket)
            .collect();
        for bucket in drained {
            bucket.clear();
            self.recycle(&guard, bucket);
        }
    }

    /// The bucket under `key`, if any. A bucket held here when it empties
    /// is detached from the map but not recycled.
    pub fn bucket(&self, key: &K) -> Option<Arc<ReferenceList<T>>> {
        let guard = self.state.lock();
        let bucket = guard.borrow().buckets.get(key).cloned();
        bucket
    }

    /// Start an iteration pass over `key`'s bucket, or `None` if the key has
    /// no bucket. The pass owns the bucket and does not hold the map lock.
    pub fn iter(&self, key: &K) -> Option<Result<BucketIter<T>, IterError>> {
        Some(BucketIter::new(self.bucket(key)?))
    }

    /// Visible items under `key`, newest first.
    pub fn snapshot(&self, key: &K) -> Vec<Arc<T>> {
        self.bucket(key).map(|b| b.snapshot()).unwrap_or_default()
    }

    /// Keys that currently own a bucket, in no particular order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let guard = self.state.lock();
        let keys = guard.borrow().buckets.keys().cloned().collect();
        keys
    }

    // Park an emptied, detached bucket for reuse. A bucket still held by a
    // caller or a live `BucketIter` is dropped instead so it never serves
    // two keys.
    fn recycle(&self, guard: &Guard<'_, K, T>, bucket: Arc<ReferenceList<T>>) {
        if Arc::strong_count(&bucket) == 1 && !bucket.has_references() {
            guard.borrow_mut().reuse.push(bucket);
            tracing::trace!("reference map bucket recycled");
        } else {
            tracing::trace!("reference map bucket still in use, not recycled");
        }
    }

    #[cfg(test)]
    fn recycled(&self) -> usize {
        let guard = self.state.lock();
        let n = guard.borrow().reuse.len();
        n
    }
}

impl<K, T> Default for ReferenceMap<K, T>
where
    K: Eq + Hash,
    T: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> core::fmt::Debug for ReferenceMap<K, T>
where
    K: Eq + Hash,
    T: ?Sized,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReferenceMap")
            .field("buckets", &self.len())
            .field("bucket_options", &self.bucket_options)
            .finish()
    }
}

/// Iteration pass over one bucket of a [`ReferenceMap`].
///
/// Like [`crate::Iter`], the pass stays on the thread that started it:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use weak_registry::{MapOptions, ReferenceMap};
///
/// let m = ReferenceMap::with_options(MapOptions::default().thread_safe(true));
/// let item = Arc::new(1);
/// m.add(1u32, &item);
/// let it = m.iter(&1).unwrap().unwrap();
/// std::thread::spawn(move || drop(it));
/// ```
pub struct BucketIter<T: ?Sized> {
    bucket: Arc<ReferenceList<T>>,
    cursor: Cursor,
    _nosend: PhantomData<*mut ()>,
}

impl<T: ?Sized> BucketIter<T> {
    fn new(bucket: Arc<ReferenceList<T>>) -> Result<Self, IterError> {
        let cursor = bucket.begin_pass()?;
        Ok(Self {
            bucket,
            cursor,
            _nosend: PhantomData,
        })
    }
}

impl<T: ?Sized> Iterator for BucketIter<T> {
    type Item = Arc<T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(&*self.bucket)
    }
}

impl<T: ?Sized> FusedIterator for BucketIter<T> {}

impl<T: ?Sized> Drop for BucketIter<T> {
    fn drop(&mut self) {
        self.cursor.finish(&*self.bucket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, MapOptions) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let ev = events.clone();
        let options = MapOptions::default().on_fullness(move |full| ev.lock().unwrap().push(full));
        (events, options)
    }

    fn values(m: &ReferenceMap<&'static str, i32>, key: &'static str) -> Vec<i32> {
        match m.iter(&key) {
            Some(it) => it.unwrap().map(|v| *v).collect(),
            None => Vec::new(),
        }
    }

    /// Invariant: buckets are created lazily and dropped when emptied.
    #[test]
    fn add_remove_manages_buckets() {
        let m = ReferenceMap::new();
        let a = Arc::new(1);
        let b = Arc::new(2);
        assert!(!m.has(&"k"));
        assert!(m.add("k", &a));
        assert!(!m.add("k", &a));
        assert!(m.add("k", &b));
        assert!(m.has(&"k"));
        assert_eq!(values(&m, "k"), vec![2, 1]);

        assert!(m.remove(&"k", &a));
        assert!(m.has(&"k"));
        assert!(m.remove(&"k", &b));
        assert!(!m.has(&"k"));
        assert!(m.is_empty());
        assert_eq!(m.recycled(), 1);
        assert!(!m.remove(&"k", &b));
    }

    /// Invariant: a new key reuses a recycled bucket.
    #[test]
    fn recycled_bucket_is_reused() {
        let m = ReferenceMap::new();
        let a = Arc::new(1);
        m.add("a", &a);
        m.remove(&"a", &a);
        assert_eq!(m.recycled(), 1);
        m.add("b", &a);
        assert_eq!(m.recycled(), 0);
        assert_eq!(values(&m, "b"), vec![1]);
        assert_eq!(values(&m, "a"), Vec::<i32>::new());
    }

    /// Invariant: move re-keys when the target is absent and merges into an
    /// existing target otherwise; the source key is gone either way.
    #[test]
    fn move_key_rekeys_or_merges() {
        let m = ReferenceMap::new();
        let a = Arc::new(1);
        let b = Arc::new(2);
        let c = Arc::new(3);
        m.add("src", &a);
        m.add("src", &b);
        m.move_key(&"src", "dst");
        assert!(!m.has(&"src"));
        assert!(m.has(&"dst"));
        assert_eq!(m.recycled(), 0, "plain re-key keeps the bucket");

        m.add("other", &c);
        m.add("other", &a);
        m.move_key(&"dst", "other");
        assert!(!m.has(&"dst"));
        assert_eq!(values(&m, "other"), vec![2, 1, 3]);
        assert_eq!(m.recycled(), 1);

        m.move_key(&"missing", "other");
        assert_eq!(m.keys(), vec!["other"]);
    }

    /// Invariant: the map-level listener fires only when the number of full
    /// buckets crosses zero.
    #[test]
    fn aggregate_fullness() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let ev = events.clone();
        let m = ReferenceMap::with_options(
            MapOptions::default().on_fullness(move |full| ev.lock().unwrap().push(full)),
        );
        let a = Arc::new(1);
        let b = Arc::new(2);
        m.add(1u32, &a);
        m.add(2u32, &b);
        m.add(2u32, &a);
        m.remove(&1, &a);
        assert_eq!(*events.lock().unwrap(), vec![true]);
        m.remove(&2, &a);
        m.remove(&2, &b);
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
        m.add(3u32, &a);
        m.clear();
        assert_eq!(*events.lock().unwrap(), vec![true, false, true, false]);
        assert!(m.is_empty());
    }

    /// Invariant: a bucket being iterated is not handed to another key.
    #[test]
    fn bucket_in_use_is_not_recycled() {
        let m = ReferenceMap::new();
        let a = Arc::new(1);
        m.add("k", &a);
        let mut it = m.iter(&"k").unwrap().unwrap();
        assert!(m.remove(&"k", &a));
        assert!(!m.has(&"k"));
        assert_eq!(m.recycled(), 0);
        assert_eq!(it.next().as_deref(), None, "staged removal hides the item");
        drop(it);
        let b = Arc::new(2);
        m.add("k", &b);
        assert_eq!(values(&m, "k"), vec![2]);
    }

    /// Invariant: adding under a key mid-pass is deferred to the next pass.
    #[test]
    fn add_during_bucket_pass() {
        let m = ReferenceMap::new();
        let a = Arc::new(1);
        let b = Arc::new(2);
        m.add("k", &a);
        let seen: Vec<i32> = m
            .iter(&"k")
            .unwrap()
            .unwrap()
            .inspect(|_| {
                m.add("k", &b);
            })
            .map(|v| *v)
            .collect();
        assert_eq!(seen, vec![1]);
        assert_eq!(m.snapshot(&"k").len(), 2);
    }

    /// Invariant: a bucket handed out by `bucket()` is shared with the map
    /// and is not recycled while the caller holds it.
    #[test]
    fn held_bucket_is_not_recycled() {
        let m = ReferenceMap::new();
        let a = Arc::new(1);
        assert!(m.bucket(&"k").is_none());
        m.add("k", &a);
        let held = m.bucket(&"k").unwrap();
        assert_eq!(held.snapshot().len(), 1);
        assert!(m.remove(&"k", &a));
        assert!(m.bucket(&"k").is_none());
        assert_eq!(m.recycled(), 0);
        drop(held);

        m.add("k", &a);
        m.remove(&"k", &a);
        assert_eq!(m.recycled(), 1);
    }

    /// Invariant: moving a key whose bucket is mid-pass keeps the items
    /// added during that pass.
    #[test]
    fn move_during_source_pass_keeps_staged_adds() {
        let (events, options) = recorder();
        let m = ReferenceMap::with_options(options);
        let a = Arc::new(1);
        let b = Arc::new(2);
        let z = Arc::new(3);
        m.add("src", &a);
        m.add("dst", &b);
        let it = m.iter(&"src").unwrap().unwrap();
        assert!(m.add("src", &z));
        m.move_key(&"src", "dst");
        assert!(!m.has(&"src"));
        assert_eq!(m.recycled(), 0, "bucket under iteration is not recycled");
        drop(it);
        assert_eq!(values(&m, "dst"), vec![3, 1, 2]);
        assert_eq!(*events.lock().unwrap(), vec![true]);

        m.clear();
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }

    /// Invariant: moving into a key whose bucket is mid-pass defers the
    /// merged items to the next pass.
    #[test]
    fn move_into_target_during_pass() {
        let (events, options) = recorder();
        let m = ReferenceMap::with_options(options);
        let a = Arc::new(1);
        let b = Arc::new(2);
        m.add("src", &a);
        m.add("dst", &b);
        let it = m.iter(&"dst").unwrap().unwrap();
        m.move_key(&"src", "dst");
        assert_eq!(m.recycled(), 1);
        let seen: Vec<i32> = it.map(|v| *v).collect();
        assert_eq!(seen, vec![2]);
        assert_eq!(values(&m, "dst"), vec![1, 2]);
        assert_eq!(m.keys(), vec!["dst"]);
        assert_eq!(*events.lock().unwrap(), vec![true]);

        m.remove(&"dst", &a);
        m.remove(&"dst", &b);
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }

    /// Invariant: clearing the map while a bucket is mid-pass empties that
    /// bucket when the pass ends, and the aggregate count reaches zero.
    #[test]
    fn clear_during_bucket_pass() {
        let (events, options) = recorder();
        let m = ReferenceMap::with_options(options);
        let x = Arc::new(1);
        let y = Arc::new(2);
        m.add("a", &x);
        m.add("b", &y);
        let mut it = m.iter(&"a").unwrap().unwrap();
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.recycled(), 1, "only the idle bucket is recycled");
        assert_eq!(*events.lock().unwrap(), vec![true]);
        assert!(it.next().is_none());
        drop(it);
        assert_eq!(*events.lock().unwrap(), vec![true, false]);

        m.add("c", &x);
        assert_eq!(m.recycled(), 0);
        assert_eq!(values(&m, "c"), vec![1]);
        assert_eq!(*events.lock().unwrap(), vec![true, false, true]);
    }
}
