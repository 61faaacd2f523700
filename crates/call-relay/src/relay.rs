//! The rendezvous mailbox between the function under test and the test
//! driver.
//!
//! See [`CallRelay`].

use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use rendezvous_fifo::{Fifo, PopError, PushError, DEFAULT_TIMEOUT};

use crate::record::CallName;

/// The shared mailbox that all call records for one test case flow through.
///
/// Exactly one call is ever in flight: a [`send`](CallRelay::send) from a
/// dependency stub does not complete until the test driver's
/// [`next`](CallRelay::next) has retrieved the record.  That rendezvous is
/// the central ordering guarantee: the driver's Nth retrieval is the
/// function under test's Nth call, so a test can assert a strict call
/// sequence without ever polling.
///
/// A relay is a cloneable handle meant to be shared by exactly two
/// parties: the stubs (collectively, on the function under test's thread)
/// and the test driver.  Construct one fresh per test case.
///
/// Most tests drive the relay through a
/// [`RelayDriver`](crate::RelayDriver) rather than calling `next` and
/// `shutdown` directly.
pub struct CallRelay<C> {
    /// The underlying rendezvous queue of call records.
    calls: Fifo<C>,
}

impl<C> Clone for CallRelay<C> {
    fn clone(&self) -> Self {
        CallRelay {
            calls: self.calls.clone(),
        }
    }
}

impl<C> Debug for CallRelay<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRelay").finish_non_exhaustive()
    }
}

impl<C> Default for CallRelay<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A relay operation failed.
///
/// The variants keep the three failure families apart: the
/// `*TimedOut` variants mean the other party never made its move within
/// the bound; [`ShutDown`](RelayError::ShutDown) means an operation ran
/// after the relay's lifecycle ended; and
/// [`CallPending`](RelayError::CallPending) means the function under test
/// made a call the test never accounted for.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RelayError {
    /// A stub's call was never retrieved by the test driver.
    #[error(
        "waited {} to deliver a {call:?} call, but the test driver never retrieved it",
        humantime::format_duration(*timeout)
    )]
    SendTimedOut {
        /// Tag of the call that went undelivered.
        call: &'static str,
        /// How long we waited.
        timeout: Duration,
    },

    /// The function under test made no call within the bound.
    #[error(
        "waited {} for the function under test to make a call, but none arrived",
        humantime::format_duration(*timeout)
    )]
    CallTimedOut {
        /// How long we waited.
        timeout: Duration,
    },

    /// The relay has been shut down.
    ///
    /// On the stub side this means a call was made after the function
    /// under test's entry function returned; on the driver side, that no
    /// further calls will ever arrive.
    #[error("the call relay is shut down")]
    ShutDown,

    /// A call was still queued when the relay was expected to be drained.
    #[error("expected no more calls, but a {call:?} call was still queued: {record}")]
    CallPending {
        /// Tag of the pending call.
        call: &'static str,
        /// `Debug` rendering of the pending call record.
        record: String,
    },

    /// The relay was still open at the shutdown deadline.
    #[error(
        "waited {} for the call relay to shut down, but it was still open",
        humantime::format_duration(*timeout)
    )]
    ShutdownTimedOut {
        /// How long we waited.
        timeout: Duration,
    },
}

impl<C> CallRelay<C> {
    /// Create a new, open relay.
    pub fn new() -> Self {
        CallRelay {
            calls: Fifo::new("calls"),
        }
    }

    /// Shut the relay down.
    ///
    /// Call this once, after the function under test's entry function has
    /// returned.  ([`RelayDriver::spawn`](crate::RelayDriver::spawn) does
    /// so automatically.)  Blocked and future [`next`](CallRelay::next)
    /// calls report [`RelayError::ShutDown`] once drained, and further
    /// sends fail fast.
    ///
    /// # Panics
    ///
    /// Shutting down twice is a bug in the test, and panics.
    pub fn shutdown(&self) {
        trace!("shutting down call relay");
        self.calls.close();
    }

    /// Return true if [`shutdown`](CallRelay::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.calls.is_closed()
    }
}

impl<C: CallName + Debug> CallRelay<C> {
    /// Deliver a call record to the test driver, waiting up to
    /// [`DEFAULT_TIMEOUT`] for it to be retrieved.
    ///
    /// This is the stub side: it blocks the function under test at the
    /// point of its dependency call until the test has observed the call.
    pub fn send(&self, call: C) -> Result<(), RelayError> {
        self.send_within(call, DEFAULT_TIMEOUT)
    }

    /// Deliver a call record to the test driver, waiting up to `timeout`.
    pub fn send_within(&self, call: C, timeout: Duration) -> Result<(), RelayError> {
        let name = call.call_name();
        trace!(call = name, "delivering call");
        self.calls.push_within(call, timeout).map_err(|e| match e {
            PushError::TimedOut { .. } => RelayError::SendTimedOut {
                call: name,
                timeout,
            },
            PushError::Closed { .. } | PushError::Spent { .. } => RelayError::ShutDown,
            _ => RelayError::ShutDown,
        })
    }

    /// Retrieve the next call record, waiting up to [`DEFAULT_TIMEOUT`].
    ///
    /// This is the driver side; retrieving unblocks the matching
    /// [`send`](CallRelay::send).
    pub fn next(&self) -> Result<C, RelayError> {
        self.next_within(DEFAULT_TIMEOUT)
    }

    /// Retrieve the next call record, waiting up to `timeout`.
    pub fn next_within(&self, timeout: Duration) -> Result<C, RelayError> {
        let call = self.calls.pop_within(timeout).map_err(|e| match e {
            PopError::TimedOut { .. } => RelayError::CallTimedOut { timeout },
            PopError::Closed { .. } => RelayError::ShutDown,
            _ => RelayError::ShutDown,
        })?;
        trace!(call = call.call_name(), "retrieved call");
        Ok(call)
    }

    /// Confirm that the relay has shut down with no call left pending,
    /// waiting up to `timeout` for it to do so.
    ///
    /// A pending call is reported by tag and `Debug` rendering, so a test
    /// that finished its assertions early says exactly which call it never
    /// accounted for.
    pub fn confirm_shutdown_within(&self, timeout: Duration) -> Result<(), RelayError> {
        match self.calls.pop_within(timeout) {
            Ok(call) => Err(RelayError::CallPending {
                call: call.call_name(),
                record: format!("{:?}", call),
            }),
            Err(PopError::Closed { .. }) => Ok(()),
            Err(_) => Err(RelayError::ShutdownTimedOut { timeout }),
        }
    }
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
    use std::time::Instant;

    use assert_matches::assert_matches;

    /// Minimal call vocabulary for these tests.
    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        First(u32),
        Second(u32),
    }

    impl CallName for Call {
        fn call_name(&self) -> &'static str {
            match self {
                Call::First(_) => "first",
                Call::Second(_) => "second",
            }
        }
    }

    #[test]
    fn calls_arrive_in_the_order_sent() {
        let relay: CallRelay<Call> = CallRelay::new();
        let stubs = relay.clone();

        let t = thread::spawn(move || {
            stubs.send(Call::First(1)).unwrap();
            stubs.send(Call::Second(2)).unwrap();
            stubs.send(Call::First(3)).unwrap();
        });

        assert_eq!(relay.next().unwrap(), Call::First(1));
        assert_eq!(relay.next().unwrap(), Call::Second(2));
        assert_eq!(relay.next().unwrap(), Call::First(3));
        t.join().unwrap();
    }

    #[test]
    fn next_times_out_when_no_call_arrives() {
        let relay: CallRelay<Call> = CallRelay::new();
        let err = relay.next_within(Duration::from_millis(50)).unwrap_err();
        assert_matches!(err, RelayError::CallTimedOut { .. });
    }

    #[test]
    fn send_after_shutdown_fails_fast() {
        let relay: CallRelay<Call> = CallRelay::new();
        relay.shutdown();

        let before = Instant::now();
        let err = relay.send(Call::First(1)).unwrap_err();
        assert_matches!(err, RelayError::ShutDown);
        assert!(before.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn undelivered_send_names_the_call() {
        let relay: CallRelay<Call> = CallRelay::new();
        let err = relay
            .send_within(Call::Second(7), Duration::from_millis(50))
            .unwrap_err();
        assert_matches!(err, RelayError::SendTimedOut { call: "second", .. });
    }

    #[test]
    fn confirm_shutdown_reports_a_pending_call() {
        let relay: CallRelay<Call> = CallRelay::new();
        let stubs = relay.clone();
        let t = thread::spawn(move || stubs.send(Call::Second(9)));

        thread::sleep(Duration::from_millis(50));
        let err = relay
            .confirm_shutdown_within(Duration::from_millis(100))
            .unwrap_err();
        match err {
            RelayError::CallPending { call, record } => {
                assert_eq!(call, "second");
                assert_eq!(record, "Second(9)");
            }
            other => panic!("got {:?}", other),
        }
        t.join().unwrap().unwrap();
    }

    #[test]
    fn confirm_shutdown_succeeds_once_drained() {
        let relay: CallRelay<Call> = CallRelay::new();
        relay.shutdown();
        relay
            .confirm_shutdown_within(Duration::from_millis(100))
            .unwrap();
        assert!(relay.is_shut_down());
    }
}
