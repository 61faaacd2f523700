//! A named, zero-capacity handoff queue shared by two threads.
//!
//! See [`Fifo`].

use std::fmt::Debug;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::err::{CloseCheckError, PopError, PushError};
use crate::DEFAULT_TIMEOUT;

/// A rendezvous FIFO: `push` completes only once a `pop` has taken the item.
///
/// A `Fifo` is a cloneable handle; clone it once so that the pushing thread
/// and the popping thread each hold one.  It is not designed for more than
/// one thread on either side.
///
/// Every queue has a diagnostic name, which appears in every error message
/// so that a failure in a test with several queues says which one was
/// involved.
///
/// # Lifecycle
///
/// A queue is open at construction.  [`close`](Fifo::close) moves it to the
/// closed state: blocked and future pops report
/// [`PopError::Closed`] once any pending item has been drained, and pushes
/// fail fast with [`PushError::Closed`].  Closing a queue twice is a bug in
/// the caller and panics.
///
/// # Timeouts
///
/// Both `push` and `pop` are bounded: the default bound is
/// [`DEFAULT_TIMEOUT`], and the `_within` variants take an explicit one.
/// There is no unbounded wait anywhere; a peer that never shows up becomes
/// a [`PushError::TimedOut`] or [`PopError::TimedOut`] at the bound.
pub struct Fifo<T> {
    /// State shared between the two handles.
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Fifo {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for Fifo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fifo")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

/// Shared state behind a pair of [`Fifo`] handles.
///
/// ### Handoff state machine
///
/// The `slot` is the single in-flight item.  A push takes the lock, waits
/// for the slot to be free, places its item, wakes a popper via
/// `item_ready`, and then waits on `slot_freed` until the item is gone.
/// A pop takes the item out of the slot and wakes the pusher.  So a push
/// returning `Ok` means the matching pop has the item: the pusher can
/// never run ahead of the popper.
///
/// If the queue is closed while an item is still in the slot, the blocked
/// pusher withdraws it and reports `Closed`; a pop never sees a
/// half-delivered item.
struct Shared<T> {
    /// Diagnostic name, used in error messages.
    name: String,
    /// The slot and the closed flag.
    state: Mutex<State<T>>,
    /// Signaled when an item is placed in the slot.
    item_ready: Condvar,
    /// Signaled when the slot empties, and on close.
    slot_freed: Condvar,
}

/// Mutable state of a [`Fifo`].
struct State<T> {
    /// The single in-flight item, if a handoff is in progress.
    slot: Option<T>,
    /// Whether [`Fifo::close`] has been called.
    closed: bool,
}

impl<T> Fifo<T> {
    /// Create a new, open queue with the given diagnostic name.
    pub fn new(name: &str) -> Self {
        Fifo {
            shared: Arc::new(Shared {
                name: name.to_owned(),
                state: Mutex::new(State {
                    slot: None,
                    closed: false,
                }),
                item_ready: Condvar::new(),
                slot_freed: Condvar::new(),
            }),
        }
    }

    /// Return this queue's diagnostic name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Hand `item` to a concurrent [`pop`](Fifo::pop), waiting up to
    /// [`DEFAULT_TIMEOUT`] for the handoff to complete.
    pub fn push(&self, item: T) -> Result<(), PushError> {
        self.push_within(item, DEFAULT_TIMEOUT)
    }

    /// Hand `item` to a concurrent pop, waiting up to `timeout`.
    ///
    /// Completes only once a pop has taken the item (rendezvous).  On
    /// [`PushError::TimedOut`] or [`PushError::Closed`] the item has been
    /// withdrawn; no later pop will observe it.
    pub fn push_within(&self, item: T, timeout: Duration) -> Result<(), PushError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        // Wait for the slot to be free.  (With a single pushing thread, as
        // intended, this loop doesn't block.)
        while state.slot.is_some() && !state.closed {
            let remaining = remaining(deadline);
            if remaining.is_zero() {
                return Err(self.timed_out_push(timeout));
            }
            state = self.shared.wait_slot_freed(state, remaining);
        }
        if state.closed {
            return Err(PushError::Closed {
                queue: self.shared.name.clone(),
            });
        }

        state.slot = Some(item);
        self.shared.item_ready.notify_one();

        // Rendezvous: wait until the item has actually been taken.
        loop {
            if state.slot.is_none() {
                return Ok(());
            }
            if state.closed {
                // Withdraw the undelivered item.
                state.slot = None;
                return Err(PushError::Closed {
                    queue: self.shared.name.clone(),
                });
            }
            let remaining = remaining(deadline);
            if remaining.is_zero() {
                state.slot = None;
                return Err(self.timed_out_push(timeout));
            }
            state = self.shared.wait_slot_freed(state, remaining);
        }
    }

    /// Take the next item, waiting up to [`DEFAULT_TIMEOUT`] for one to be
    /// pushed.
    pub fn pop(&self) -> Result<T, PopError> {
        self.pop_within(DEFAULT_TIMEOUT)
    }

    /// Take the next item, waiting up to `timeout`.
    ///
    /// A pending item is drained even if the queue has been closed; only a
    /// closed *and empty* queue reports [`PopError::Closed`], and it does so
    /// immediately, without waiting out the timeout.
    pub fn pop_within(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        loop {
            if let Some(item) = state.slot.take() {
                self.shared.slot_freed.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(PopError::Closed {
                    queue: self.shared.name.clone(),
                });
            }
            let remaining = remaining(deadline);
            if remaining.is_zero() {
                return Err(PopError::TimedOut {
                    queue: self.shared.name.clone(),
                    timeout,
                });
            }
            let (guard, _) = self
                .shared
                .item_ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(|_| panic!("{:?} queue lock poisoned", self.shared.name));
            state = guard;
        }
    }

    /// Close the queue, waking every blocked push and pop.
    ///
    /// # Panics
    ///
    /// Closing a queue twice is a bug in the caller, and panics.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            panic!("the {:?} queue was closed twice", self.shared.name);
        }
        state.closed = true;
        self.shared.item_ready.notify_all();
        self.shared.slot_freed.notify_all();
    }

    /// Return true if [`close`](Fifo::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Build the push-timeout error for this queue.
    fn timed_out_push(&self, timeout: Duration) -> PushError {
        PushError::TimedOut {
            queue: self.shared.name.clone(),
            timeout,
        }
    }
}

impl<T: Debug> Fifo<T> {
    /// Confirm that the queue is closed and empty, waiting up to
    /// [`DEFAULT_TIMEOUT`] for it to become so.
    pub fn confirm_closed(&self) -> Result<(), CloseCheckError> {
        self.confirm_closed_within(DEFAULT_TIMEOUT)
    }

    /// Confirm that the queue is closed and empty, waiting up to `timeout`.
    ///
    /// If an item is still pending, reports it (via its `Debug` form) in
    /// [`CloseCheckError::NotEmpty`]; if the queue is simply still open at
    /// the deadline, reports [`CloseCheckError::NotClosed`].
    pub fn confirm_closed_within(&self, timeout: Duration) -> Result<(), CloseCheckError> {
        match self.pop_within(timeout) {
            Ok(item) => Err(CloseCheckError::NotEmpty {
                queue: self.shared.name.clone(),
                item: format!("{:?}", item),
            }),
            Err(PopError::Closed { .. }) => Ok(()),
            Err(_) => Err(CloseCheckError::NotClosed {
                queue: self.shared.name.clone(),
                timeout,
            }),
        }
    }
}

impl<T> Shared<T> {
    /// Take the state lock.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state
            .lock()
            .unwrap_or_else(|_| panic!("{:?} queue lock poisoned", self.name))
    }

    /// Wait on `slot_freed` for up to `dur`, tolerating spurious wakeups
    /// (the callers loop).
    fn wait_slot_freed<'a>(
        &self,
        state: MutexGuard<'a, State<T>>,
        dur: Duration,
    ) -> MutexGuard<'a, State<T>> {
        let (guard, _) = self
            .slot_freed
            .wait_timeout(state, dur)
            .unwrap_or_else(|_| panic!("{:?} queue lock poisoned", self.name));
        guard
    }
}

/// Time remaining until `deadline`, or zero if it has passed.
fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    use std::thread;

    /// Upper bound on scheduler jitter for timing assertions.
    const JITTER: Duration = Duration::from_millis(250);

    #[test]
    fn handoff_is_a_rendezvous() {
        let fifo: Fifo<u32> = Fifo::new("handoff");
        let popper = fifo.clone();
        let delay = Duration::from_millis(100);

        let before = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(delay);
            popper.pop().unwrap()
        });

        fifo.push(7).unwrap();
        let elapsed = before.elapsed();

        // The push can't have completed before the pop was ready.
        assert!(elapsed >= delay, "push returned after only {:?}", elapsed);
        assert_eq!(t.join().unwrap(), 7);
    }

    #[test]
    fn items_arrive_in_push_order() {
        let fifo: Fifo<u32> = Fifo::new("ordered");
        let pusher = fifo.clone();

        let t = thread::spawn(move || {
            for i in 0..5 {
                pusher.push(i).unwrap();
            }
        });

        for i in 0..5 {
            assert_eq!(fifo.pop().unwrap(), i);
        }
        t.join().unwrap();
    }

    #[test]
    fn pop_times_out_at_about_the_bound() {
        let fifo: Fifo<u32> = Fifo::new("empty");
        let bound = Duration::from_millis(100);

        let before = Instant::now();
        let err = fifo.pop_within(bound).unwrap_err();
        let elapsed = before.elapsed();

        assert!(err.is_timeout(), "got {:?}", err);
        assert!(elapsed >= bound);
        assert!(elapsed <= bound + JITTER, "took {:?}", elapsed);
    }

    #[test]
    fn push_times_out_when_nobody_pops() {
        let fifo: Fifo<u32> = Fifo::new("ignored");
        let err = fifo.push_within(1, Duration::from_millis(50)).unwrap_err();
        assert!(err.is_timeout(), "got {:?}", err);

        // The timed-out item was withdrawn, not left for a later pop.
        let err = fifo.pop_within(Duration::from_millis(50)).unwrap_err();
        assert!(err.is_timeout(), "got {:?}", err);
    }

    #[test]
    fn closed_and_empty_pops_immediately() {
        let fifo: Fifo<u32> = Fifo::new("closing");
        fifo.close();

        let before = Instant::now();
        let err = fifo.pop().unwrap_err();
        assert!(matches!(err, PopError::Closed { .. }), "got {:?}", err);
        assert!(before.elapsed() < JITTER);
    }

    #[test]
    fn close_wakes_a_blocked_pop() {
        let fifo: Fifo<u32> = Fifo::new("woken");
        let popper = fifo.clone();

        let t = thread::spawn(move || popper.pop());

        thread::sleep(Duration::from_millis(50));
        fifo.close();

        let err = t.join().unwrap().unwrap_err();
        assert!(matches!(err, PopError::Closed { .. }), "got {:?}", err);
    }

    #[test]
    fn close_wakes_a_blocked_push_and_withdraws_the_item() {
        let fifo: Fifo<u32> = Fifo::new("withdrawn");
        let pusher = fifo.clone();

        let t = thread::spawn(move || pusher.push(3));

        thread::sleep(Duration::from_millis(50));
        fifo.close();

        let err = t.join().unwrap().unwrap_err();
        assert!(matches!(err, PushError::Closed { .. }), "got {:?}", err);

        let err = fifo.pop().unwrap_err();
        assert!(matches!(err, PopError::Closed { .. }), "got {:?}", err);
    }

    #[test]
    fn push_after_close_fails_fast() {
        let fifo: Fifo<u32> = Fifo::new("shut");
        fifo.close();

        let before = Instant::now();
        let err = fifo.push(1).unwrap_err();
        assert!(matches!(err, PushError::Closed { .. }), "got {:?}", err);
        assert!(before.elapsed() < JITTER);
    }

    #[test]
    #[should_panic(expected = "closed twice")]
    fn double_close_panics() {
        let fifo: Fifo<u32> = Fifo::new("twice");
        fifo.close();
        fifo.close();
    }

    #[test]
    fn confirm_closed_reports_each_failure_mode() {
        // Still open:
        let fifo: Fifo<u32> = Fifo::new("open");
        let err = fifo
            .confirm_closed_within(Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, CloseCheckError::NotClosed { .. }), "got {:?}", err);

        // An item still pending:
        let pusher = fifo.clone();
        let t = thread::spawn(move || pusher.push(9));
        thread::sleep(Duration::from_millis(50));
        let err = fifo.confirm_closed().unwrap_err();
        match err {
            CloseCheckError::NotEmpty { item, .. } => assert_eq!(item, "9"),
            other => panic!("got {:?}", other),
        }
        t.join().unwrap().unwrap();

        // Closed and drained:
        fifo.close();
        fifo.confirm_closed().unwrap();
    }

    #[test]
    fn error_messages_name_the_queue() {
        let fifo: Fifo<u32> = Fifo::new("relay calls");
        let msg = fifo.pop_within(Duration::from_millis(10)).unwrap_err().to_string();
        assert!(msg.contains("relay calls"), "message was {:?}", msg);
        assert!(msg.contains("10ms"), "message was {:?}", msg);
    }
}
