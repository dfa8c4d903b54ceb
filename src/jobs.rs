//! JobList: callbacks buffered until a condition holds.
//!
//! A job added while the condition is true runs immediately and flushes
//! anything buffered before it. Otherwise it is buffered until `trigger`
//! observes the condition (or is forced). Flushes run newest job first.

use core::cell::RefCell;
use parking_lot::ReentrantMutex;
use std::sync::Arc;

pub type Job = Box<dyn FnOnce() + Send>;
type Hook = Arc<dyn Fn() + Send + Sync>;

struct JobState {
    jobs: Vec<Job>,
    // Last observed value of the condition.
    ready: bool,
}

/// Deferred job buffer gated by a caller-supplied condition.
pub struct JobList {
    can_execute: Box<dyn Fn() -> bool + Send + Sync>,
    state: ReentrantMutex<RefCell<JobState>>,
    on_add: Option<Hook>,
    on_remove: Option<Hook>,
}

impl JobList {
    pub fn new<F>(can_execute: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let ready = can_execute();
        Self {
            can_execute: Box::new(can_execute),
            state: ReentrantMutex::new(RefCell::new(JobState {
                jobs: Vec::new(),
                ready,
            })),
            on_add: None,
            on_remove: None,
        }
    }

    /// Install hooks run once per buffered job (`on_add`) and once per
    /// flushed job (`on_remove`), after the lock is released.
    pub fn on_add_remove<A, R>(mut self, on_add: A, on_remove: R) -> Self
    where
        A: Fn() + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        self.on_add = Some(Arc::new(on_add));
        self.on_remove = Some(Arc::new(on_remove));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().jobs.len();
        len
    }

    // Re-evaluate the condition. A condition that stayed true must not
    // leave jobs behind.
    fn ready(&self, st: &mut JobState) -> bool {
        let now = (self.can_execute)();
        if st.ready != now {
            st.ready = now;
            return now;
        }
        assert!(
            !(now && !st.jobs.is_empty()),
            "job list holds jobs while its condition stayed true"
        );
        now
    }

    /// Run `job` now if the condition holds, otherwise buffer it.
    pub fn add<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let flushed = {
            let guard = self.state.lock();
            let ready = self.ready(&mut guard.borrow_mut());
            if ready {
                job();
                Some(self.flush(&guard))
            } else {
                guard.borrow_mut().jobs.push(Box::new(job));
                None
            }
        };
        match flushed {
            None => {
                if let Some(hook) = &self.on_add {
                    hook();
                }
            }
            Some(count) => self.run_remove_hooks(count),
        }
    }

    /// Flush buffered jobs if the condition holds or `force` is set.
    pub fn trigger(&self, force: bool) {
        let count = {
            let guard = self.state.lock();
            let ready = self.ready(&mut guard.borrow_mut());
            if ready || force {
                self.flush(&guard)
            } else {
                0
            }
        };
        self.run_remove_hooks(count);
    }

    fn flush(&self, guard: &RefCell<JobState>) -> usize {
        let pending = core::mem::take(&mut guard.borrow_mut().jobs);
        let count = pending.len();
        if count > 0 {
            tracing::trace!(count, "flushing deferred jobs");
        }
        for job in pending.into_iter().rev() {
            job();
        }
        count
    }

    fn run_remove_hooks(&self, count: usize) {
        if let Some(hook) = &self.on_remove {
            for _ in 0..count {
                hook();
            }
        }
    }
}

impl core::fmt::Debug for JobList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobList").field("len", &self.len()).finish()
    }
}
