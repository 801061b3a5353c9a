use thiserror::Error;

/// Failures raised by a [`RecordStore`](crate::store::RecordStore).
///
/// Every variant is a transient or operational failure. None of them mean the
/// secret is gone, and callers must never report one as such.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be read or written.
    #[error("storage backend failure: {0:#}")]
    Backend(anyhow::Error),

    /// `put` was called with an id that is already taken.
    #[error("record {0} already exists")]
    AlreadyExists(String),

    /// An optimistic update kept losing to concurrent writers.
    #[error("record {0} is under contention")]
    Contention(String),
}

impl StoreError {
    pub(crate) fn backend(e: impl Into<anyhow::Error>) -> Self {
        Self::Backend(e.into())
    }
}

/// Protocol-level outcomes of the secret lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Missing, expired, revealed or burned. Deliberately indistinguishable.
    #[error("secret not found or destroyed")]
    Gone,

    /// The PIN did not match. Carries the attempts left after this guess.
    #[error("incorrect pin, {attempts_remaining} attempt(s) remaining")]
    WrongPin { attempts_remaining: u32 },

    /// The admin token presented to `burn` did not match.
    #[error("invalid admin token")]
    Unauthorized,

    /// The request was rejected before touching the store.
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("pin hashing failed: {0}")]
    Pin(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
