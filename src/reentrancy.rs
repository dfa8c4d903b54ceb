//! Iteration gate.
//!
//! Binary semaphore that lets one iteration pass at a time run over a
//! thread-safe registry. Unlike a plain semaphore it remembers the holder
//! thread, so nested entry from the holder fails with `Reentrant` instead
//! of blocking forever. Waiters can be woken with `interrupt`, which makes
//! them fail with `Interrupted`.

use crate::error::IterError;
use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct GateState {
    holder: Option<ThreadId>,
    // Bumped by `interrupt`; a waiter compares against its entry value.
    interrupts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct IterationGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl IterationGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until the gate is free, then take it for the current thread.
    pub(crate) fn acquire(&self) -> Result<(), IterError> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.holder == Some(me) {
            return Err(IterError::Reentrant);
        }
        let seen = st.interrupts;
        if st.holder.is_some() {
            tracing::debug!(thread = ?me, "iteration gate busy, waiting");
        }
        while st.holder.is_some() {
            self.released.wait(&mut st);
            if st.interrupts != seen {
                return Err(IterError::Interrupted);
            }
        }
        st.holder = Some(me);
        Ok(())
    }

    pub(crate) fn release(&self) {
        let mut st = self.state.lock();
        debug_assert!(st.holder.is_some(), "gate released while free");
        st.holder = None;
        drop(st);
        self.released.notify_one();
    }

    /// Wake every waiter with `Interrupted`. The current holder is unaffected.
    pub(crate) fn interrupt(&self) {
        let mut st = self.state.lock();
        st.interrupts = st.interrupts.wrapping_add(1);
        drop(st);
        self.released.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.state.lock().holder.is_some()
    }
}
