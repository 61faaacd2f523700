//! Errors reported by [`Fifo`](crate::Fifo) and [`OneShot`](crate::OneShot).

use std::time::Duration;

use thiserror::Error;

/// A `push` did not deliver its item.
///
/// In every case the item has been withdrawn: a failed push never leaves a
/// half-delivered item behind for a later pop to find.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum PushError {
    /// No pop arrived to take the item within the timeout.
    #[error(
        "waited {} to hand an item to the {queue:?} queue, but nothing popped it",
        humantime::format_duration(*timeout)
    )]
    TimedOut {
        /// Name of the queue, as given at construction.
        queue: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The queue was closed before (or while) the item could be handed over.
    #[error("cannot push: the {queue:?} queue is closed")]
    Closed {
        /// Name of the queue, as given at construction.
        queue: String,
    },

    /// A one-shot queue has already accepted its single item.
    ///
    /// This is a misuse of the API, not an expected runtime condition: the
    /// pusher tried to deliver two values through a single-use handoff.
    #[error("the one-shot {queue:?} queue has already accepted its one item")]
    Spent {
        /// Name of the queue, as given at construction.
        queue: String,
    },
}

/// A `pop` did not produce an item.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum PopError {
    /// No item was pushed within the timeout.
    #[error(
        "waited {} for an item from the {queue:?} queue, but there was none",
        humantime::format_duration(*timeout)
    )]
    TimedOut {
        /// Name of the queue, as given at construction.
        queue: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The queue is closed and has no pending item.
    #[error("the {queue:?} queue is closed and empty")]
    Closed {
        /// Name of the queue, as given at construction.
        queue: String,
    },
}

/// A queue that was expected to be closed and drained, wasn't.
///
/// Returned by [`Fifo::confirm_closed_within`](crate::Fifo::confirm_closed_within).
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CloseCheckError {
    /// An item was still waiting to be popped.
    #[error("expected no more items in the {queue:?} queue, but found {item}")]
    NotEmpty {
        /// Name of the queue, as given at construction.
        queue: String,
        /// `Debug` rendering of the pending item.
        item: String,
    },

    /// The queue had not been closed by the deadline.
    #[error(
        "expected the {queue:?} queue to be closed, but it was still open after {}",
        humantime::format_duration(*timeout)
    )]
    NotClosed {
        /// Name of the queue, as given at construction.
        queue: String,
        /// How long we waited.
        timeout: Duration,
    },
}

impl PushError {
    /// Return true if this is the timeout case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PushError::TimedOut { .. })
    }
}

impl PopError {
    /// Return true if this is the timeout case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PopError::TimedOut { .. })
    }
}
