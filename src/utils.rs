//! Stateless helpers over raw slot containers.
//!
//! These operate on caller-owned `Vec<Slot<T>>` lists, or on maps of such
//! lists keyed by any `SlotBuckets` implementation. Reclaimed slots found
//! along the way are swept out.

use crate::slot::{Slot, SlotKind};
use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A map from keys to slot lists.
pub trait SlotBuckets<K, T: ?Sized> {
    fn bucket_mut(&mut self, key: &K) -> Option<&mut Vec<Slot<T>>>;
    fn insert_bucket(&mut self, key: K, list: Vec<Slot<T>>);
    fn remove_bucket(&mut self, key: &K) -> Option<Vec<Slot<T>>>;
}

impl<K, T, S> SlotBuckets<K, T> for std::collections::HashMap<K, Vec<Slot<T>>, S>
where
    K: Eq + Hash,
    T: ?Sized,
    S: BuildHasher,
{
    fn bucket_mut(&mut self, key: &K) -> Option<&mut Vec<Slot<T>>> {
        self.get_mut(key)
    }
    fn insert_bucket(&mut self, key: K, list: Vec<Slot<T>>) {
        self.insert(key, list);
    }
    fn remove_bucket(&mut self, key: &K) -> Option<Vec<Slot<T>>> {
        self.remove(key)
    }
}

impl<K, T, S> SlotBuckets<K, T> for hashbrown::HashMap<K, Vec<Slot<T>>, S>
where
    K: Eq + Hash,
    T: ?Sized,
    S: BuildHasher,
{
    fn bucket_mut(&mut self, key: &K) -> Option<&mut Vec<Slot<T>>> {
        self.get_mut(key)
    }
    fn insert_bucket(&mut self, key: K, list: Vec<Slot<T>>) {
        self.insert(key, list);
    }
    fn remove_bucket(&mut self, key: &K) -> Option<Vec<Slot<T>>> {
        self.remove(key)
    }
}

impl<K: Ord, T: ?Sized> SlotBuckets<K, T> for BTreeMap<K, Vec<Slot<T>>> {
    fn bucket_mut(&mut self, key: &K) -> Option<&mut Vec<Slot<T>>> {
        self.get_mut(key)
    }
    fn insert_bucket(&mut self, key: K, list: Vec<Slot<T>>) {
        self.insert(key, list);
    }
    fn remove_bucket(&mut self, key: &K) -> Option<Vec<Slot<T>>> {
        self.remove(key)
    }
}

/// Remove the newest slot referring to `item`. Reclaimed slots passed
/// over during the scan are dropped too.
pub fn remove_slot<T: ?Sized>(list: &mut Vec<Slot<T>>, item: &Arc<T>) -> bool {
    let mut i = list.len();
    while i > 0 {
        i -= 1;
        if !list[i].is_live() {
            list.remove(i);
        } else if list[i].refers_to(item) {
            list.remove(i);
            return true;
        }
    }
    false
}

/// `remove_slot` on the list stored under `key`; the list is dropped from
/// the map once empty.
pub fn remove_slot_in<K, T, M>(map: &mut M, key: &K, item: &Arc<T>) -> bool
where
    T: ?Sized,
    M: SlotBuckets<K, T>,
{
    let Some(list) = map.bucket_mut(key) else {
        return false;
    };
    let removed = remove_slot(list, item);
    if list.is_empty() {
        map.remove_bucket(key);
    }
    removed
}

/// Append a weak slot for `item` unless one is already present.
pub fn add_slot<T: ?Sized>(list: &mut Vec<Slot<T>>, item: &Arc<T>) -> bool {
    add_slot_with(SlotKind::Weak, list, item)
}

/// Sweep reclaimed slots, then append a `kind` slot for `item` unless one
/// is already present.
pub fn add_slot_with<T: ?Sized>(kind: SlotKind, list: &mut Vec<Slot<T>>, item: &Arc<T>) -> bool {
    let mut found = false;
    list.retain(|s| {
        if !s.is_live() {
            return false;
        }
        found |= s.refers_to(item);
        true
    });
    if found {
        return false;
    }
    list.push(kind.make(item));
    true
}

/// `add_slot` on the list stored under `key`, creating it if missing.
pub fn add_slot_in<K, T, M>(map: &mut M, key: K, item: &Arc<T>) -> bool
where
    T: ?Sized,
    M: SlotBuckets<K, T>,
{
    match map.bucket_mut(&key) {
        Some(list) => add_slot(list, item),
        None => {
            map.insert_bucket(key, vec![Slot::weak(item)]);
            true
        }
    }
}

/// Drop every reclaimed slot; returns how many were removed.
pub fn purge_reclaimed<T: ?Sized>(list: &mut Vec<Slot<T>>) -> usize {
    let before = list.len();
    list.retain(Slot::is_live);
    let purged = before - list.len();
    if purged > 0 {
        tracing::debug!(purged, "purged reclaimed slots");
    }
    purged
}

/// Drop the list under `key` if it is empty. Returns whether it was dropped.
pub fn remove_list_if_empty<K, T, M>(map: &mut M, key: &K) -> bool
where
    T: ?Sized,
    M: SlotBuckets<K, T>,
{
    match map.bucket_mut(key) {
        Some(list) if list.is_empty() => map.remove_bucket(key).is_some(),
        _ => false,
    }
}
