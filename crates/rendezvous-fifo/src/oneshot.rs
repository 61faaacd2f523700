//! A FIFO that accepts exactly one push.
//!
//! See [`OneShot`].

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::err::{PopError, PushError};
use crate::fifo::Fifo;
use crate::DEFAULT_TIMEOUT;

/// A single-use [`Fifo`]: one push is accepted, and the queue closes as
/// that push completes.
///
/// Meant for single-value handoff, such as carrying one return value back
/// to one caller.  The auto-close turns two whole classes of test bug into
/// immediate, loud failures: injecting two values for one call
/// ([`PushError::Spent`]) and reading the same value twice
/// ([`PopError::Closed`]).
pub struct OneShot<T> {
    /// The underlying rendezvous queue.
    fifo: Fifo<T>,
    /// Set once a push has been accepted (or attempted and timed out).
    ///
    /// Shared between clones, like the queue itself.
    spent: Arc<AtomicBool>,
}

impl<T> Clone for OneShot<T> {
    fn clone(&self) -> Self {
        OneShot {
            fifo: self.fifo.clone(),
            spent: Arc::clone(&self.spent),
        }
    }
}

impl<T> Debug for OneShot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShot")
            .field("name", &self.fifo.name())
            .finish_non_exhaustive()
    }
}

impl<T> OneShot<T> {
    /// Create a new, open one-shot queue with the given diagnostic name.
    pub fn new(name: &str) -> Self {
        OneShot {
            fifo: Fifo::new(name),
            spent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Return this queue's diagnostic name.
    pub fn name(&self) -> &str {
        self.fifo.name()
    }

    /// Hand over the queue's single item, waiting up to [`DEFAULT_TIMEOUT`].
    pub fn push(&self, item: T) -> Result<(), PushError> {
        self.push_within(item, DEFAULT_TIMEOUT)
    }

    /// Hand over the queue's single item, waiting up to `timeout`.
    ///
    /// After a successful push the queue is closed.  A second push is a bug
    /// in the caller and fails fast with [`PushError::Spent`], whether or
    /// not the first push succeeded.
    pub fn push_within(&self, item: T, timeout: Duration) -> Result<(), PushError> {
        if self.spent.swap(true, Ordering::SeqCst) {
            return Err(PushError::Spent {
                queue: self.fifo.name().to_owned(),
            });
        }
        self.fifo.push_within(item, timeout)?;
        self.fifo.close();
        Ok(())
    }

    /// Take the queue's single item, waiting up to [`DEFAULT_TIMEOUT`].
    pub fn pop(&self) -> Result<T, PopError> {
        self.pop_within(DEFAULT_TIMEOUT)
    }

    /// Take the queue's single item, waiting up to `timeout`.
    ///
    /// Blocks until the item is pushed; never yields a stale or default
    /// value.  Once the item has been consumed (or the queue explicitly
    /// closed), reports [`PopError::Closed`] immediately.
    pub fn pop_within(&self, timeout: Duration) -> Result<T, PopError> {
        self.fifo.pop_within(timeout)
    }

    /// Close the queue without pushing anything.
    ///
    /// Later pops report [`PopError::Closed`]; later pushes,
    /// [`PushError::Spent`].
    ///
    /// # Panics
    ///
    /// Panics if the queue is already closed (including by a completed
    /// push).
    pub fn close(&self) {
        self.spent.store(true, Ordering::SeqCst);
        self.fifo.close();
    }
}
