//! Weak slots: lookup-only handles to caller-owned items.
//!
//! A slot never owns its item in the default `Weak` mode; it resolves to
//! `None` once the last caller-held `Arc` is dropped. The `Strong` mode
//! keeps the item alive and exists for registries that must not lose
//! entries to reclamation.

use core::ptr;
use std::sync::{Arc, Weak};

/// How a registry turns an incoming item into a slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum SlotKind {
    #[default]
    Weak,
    Strong,
}

impl SlotKind {
    /// Build a slot of this kind for `item`.
    #[inline]
    pub fn make<T: ?Sized>(self, item: &Arc<T>) -> Slot<T> {
        match self {
            SlotKind::Weak => Slot::Weak(Arc::downgrade(item)),
            SlotKind::Strong => Slot::Strong(item.clone()),
        }
    }
}

/// A handle to an item. Identity is pointer identity of the allocation.
pub enum Slot<T: ?Sized> {
    Weak(Weak<T>),
    Strong(Arc<T>),
}

impl<T: ?Sized> Slot<T> {
    pub fn weak(item: &Arc<T>) -> Self {
        Slot::Weak(Arc::downgrade(item))
    }

    pub fn strong(item: &Arc<T>) -> Self {
        Slot::Strong(item.clone())
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Slot::Weak(_) => SlotKind::Weak,
            Slot::Strong(_) => SlotKind::Strong,
        }
    }

    /// Resolve to the item, or `None` if it has been reclaimed.
    #[inline]
    pub fn try_resolve(&self) -> Option<Arc<T>> {
        match self {
            Slot::Weak(w) => w.upgrade(),
            Slot::Strong(a) => Some(a.clone()),
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        match self {
            Slot::Weak(w) => w.strong_count() > 0,
            Slot::Strong(_) => true,
        }
    }

    /// True if this slot is live and points at `item`'s allocation.
    #[inline]
    pub fn refers_to(&self, item: &Arc<T>) -> bool {
        match self {
            Slot::Weak(w) => {
                w.strong_count() > 0 && ptr::addr_eq(w.as_ptr(), Arc::as_ptr(item))
            }
            Slot::Strong(a) => Arc::ptr_eq(a, item),
        }
    }

    /// Slot identity: both slots point at the same allocation. Reclaimed
    /// slots still compare by address since `Weak` pins the allocation.
    #[inline]
    pub fn same_slot(&self, other: &Slot<T>) -> bool {
        match (self, other) {
            (Slot::Weak(a), Slot::Weak(b)) => Weak::ptr_eq(a, b),
            (Slot::Strong(a), Slot::Strong(b)) => Arc::ptr_eq(a, b),
            (Slot::Weak(w), Slot::Strong(a)) | (Slot::Strong(a), Slot::Weak(w)) => {
                ptr::addr_eq(w.as_ptr(), Arc::as_ptr(a))
            }
        }
    }
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Weak(w) => Slot::Weak(w.clone()),
            Slot::Strong(a) => Slot::Strong(a.clone()),
        }
    }
}

impl<T: ?Sized> core::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Slot")
            .field("kind", &self.kind())
            .field("live", &self.is_live())
            .finish()
    }
}
