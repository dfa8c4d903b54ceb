use thiserror::Error;

/// Failure to start an iteration pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum IterError {
    /// A pass is already running on a list that is not thread-safe.
    #[error("previous iteration has not been completed")]
    AlreadyIterating,
    /// The thread holding the iteration gate tried to iterate again.
    #[error("re-entrant iteration from the thread holding the gate")]
    Reentrant,
    /// The wait for the iteration gate was interrupted.
    #[error("interrupted while waiting for the iteration gate")]
    Interrupted,
}
