//! The relay-driven test harness.
//!
//! See [`RelayDriver`].

use std::fmt::Debug;
use std::panic::resume_unwind;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::trace;

use rendezvous_fifo::DEFAULT_TIMEOUT;

use crate::record::CallName;
use crate::relay::CallRelay;

/// Runs a function under test on its own thread and drives its call relay.
///
/// [`spawn`](RelayDriver::spawn) starts the function under test (FUT) and
/// arranges for the relay to be shut down the moment the FUT's entry
/// function returns.  The test then calls
/// [`expect_call`](RelayDriver::expect_call) once per expected dependency
/// call (retrieving the next call, checking its identity, and handing it
/// back for argument assertions and reply injection), and finishes with
/// [`assert_done_within`](RelayDriver::assert_done_within) /
/// [`assert_returned`](RelayDriver::assert_returned).
///
/// All failures here are panics: this type *is* the test's fatal-failure
/// mechanism.  If the FUT thread itself panicked, the driver resurfaces
/// that panic (rather than a secondary timeout) so the test fails with the
/// original cause.
///
/// Dropping a driver detaches the FUT thread; a test that fails by timeout
/// deliberately leaks the stuck thread for the test runner to reclaim.
pub struct RelayDriver<C, R> {
    /// The driver-side relay handle.
    relay: CallRelay<C>,
    /// The FUT thread, or its already-collected result.
    fut: FutState<R>,
}

/// Where the function under test's result currently lives.
enum FutState<R> {
    /// Still on the thread (which may or may not have finished).
    Running(JoinHandle<R>),
    /// Joined early (while surfacing a possible panic), result in hand.
    Done(R),
    /// Transient placeholder while the states above are being swapped.
    Taken,
}

impl<C, R> Debug for RelayDriver<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDriver").finish_non_exhaustive()
    }
}

impl<C, R> RelayDriver<C, R>
where
    C: CallName + Debug + Send + 'static,
    R: Send + 'static,
{
    /// Start `fut` (the function under test, closed over its stubs) on
    /// its own thread.
    ///
    /// When `fut` returns, the relay is shut down, so stray dependency
    /// calls after that point fail fast, and
    /// [`assert_done_within`](RelayDriver::assert_done_within) can tell
    /// "FUT finished" from "FUT is stuck".
    ///
    /// # Panics
    ///
    /// Panics if the thread cannot be spawned.
    pub fn spawn<F>(relay: CallRelay<C>, fut: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let on_fut_return = relay.clone();
        let handle = thread::Builder::new()
            .name("function-under-test".to_owned())
            .spawn(move || {
                let result = fut();
                on_fut_return.shutdown();
                result
            })
            .expect("could not spawn the function-under-test thread");
        trace!("function under test started");
        RelayDriver {
            relay,
            fut: FutState::Running(handle),
        }
    }

    /// Retrieve the next call and assert that it is an `expected` call.
    ///
    /// Returns the call record so the test can destructure it, assert on
    /// its arguments, and inject its reply.  Waits up to
    /// [`DEFAULT_TIMEOUT`].
    ///
    /// # Panics
    ///
    /// Panics with an identity-mismatch message (naming both the expected
    /// and the actual call) if a different call arrived; with a timeout
    /// message if no call arrived; or resurfaces the FUT's own panic if
    /// that is why no call arrived.
    pub fn expect_call(&mut self, expected: &'static str) -> C {
        self.expect_call_within(expected, DEFAULT_TIMEOUT)
    }

    /// Like [`expect_call`](RelayDriver::expect_call), with an explicit
    /// timeout.
    pub fn expect_call_within(&mut self, expected: &'static str, timeout: Duration) -> C {
        match self.relay.next_within(timeout) {
            Ok(call) if call.call_name() == expected => call,
            Ok(call) => panic!(
                "expected the next call to be {:?}, but {:?} was made instead: {:?}",
                expected,
                call.call_name(),
                call
            ),
            Err(e) => {
                self.surface_fut_panic();
                panic!("expected a {:?} call, but {}", expected, e);
            }
        }
    }

    /// Assert that the relay shuts down, drained, within `timeout`.
    ///
    /// # Panics
    ///
    /// Panics if a call is still queued (naming it), or if the relay is
    /// still open at the deadline; resurfaces the FUT's panic if it has
    /// one.
    pub fn assert_done_within(&mut self, timeout: Duration) {
        if let Err(e) = self.relay.confirm_shutdown_within(timeout) {
            self.surface_fut_panic();
            panic!("the function under test is not done: {}", e);
        }
    }

    /// Assert completion within [`DEFAULT_TIMEOUT`] and return the FUT's
    /// return value.
    pub fn join_within(mut self, timeout: Duration) -> R {
        self.assert_done_within(timeout);
        match std::mem::replace(&mut self.fut, FutState::Taken) {
            FutState::Running(handle) => handle.join().unwrap_or_else(|e| resume_unwind(e)),
            FutState::Done(result) => result,
            FutState::Taken => unreachable!("FUT result already taken"),
        }
    }

    /// If the FUT thread has finished, collect its result now; if it
    /// finished by panicking, resume that panic on this thread.
    ///
    /// Called before reporting any driver-side failure, so that a test
    /// whose FUT panicked reports that panic, not the silence it caused.
    fn surface_fut_panic(&mut self) {
        let finished = matches!(&self.fut, FutState::Running(handle) if handle.is_finished());
        if finished {
            match std::mem::replace(&mut self.fut, FutState::Taken) {
                FutState::Running(handle) => match handle.join() {
                    Ok(result) => self.fut = FutState::Done(result),
                    Err(payload) => resume_unwind(payload),
                },
                _ => unreachable!("FUT state changed underneath us"),
            }
        }
    }
}

impl<C, R> RelayDriver<C, R>
where
    C: CallName + Debug + Send + 'static,
    R: PartialEq + Debug + Send + 'static,
{
    /// Assert completion within [`DEFAULT_TIMEOUT`] and that the FUT
    /// returned `expected` (structural equality).
    ///
    /// # Panics
    ///
    /// Panics, reporting both values, if the return value differs.
    pub fn assert_returned(self, expected: R) {
        let actual = self.join_within(DEFAULT_TIMEOUT);
        if actual != expected {
            panic!(
                "expected the function under test to return {:?}, but it returned {:?}",
                expected, actual
            );
        }
    }
}
