use std::time::Duration;

/// Errors reported by the maps in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A map was configured with parameters it cannot work with.
    #[error("invalid map configuration: {0}")]
    Validation(String),

    /// A fail-fast [`Cursor`](crate::Cursor) noticed that entries were added to or removed from
    /// the map since it was created.
    #[error("map was structurally modified while a cursor was traversing it")]
    ConcurrentStructuralChange,

    /// A larger table could not be allocated. The map is left as it was before the attempt.
    #[error("could not allocate a table with {requested} bins")]
    CapacityExhausted {
        /// The number of bins the map tried to allocate.
        requested: usize,
    },

    /// A bin lock could not be acquired within the given time. The map was not modified.
    #[error("bin lock was not acquired within {timeout:?}")]
    LockTimeout {
        /// How long the caller was willing to wait.
        timeout: Duration,
    },
}

/// A `Result` whose error type defaults to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
