//! Single-use return-value handoff for one dependency call.
//!
//! See [`reply_channel`].

use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use rendezvous_fifo::{OneShot, PopError, PushError, DEFAULT_TIMEOUT};

/// Create the reply channel for one dependency call.
///
/// Returns the two single-use halves: the stub embeds the
/// [`ReplySender`] in the call record it sends through the relay and keeps
/// the [`ReplyReceiver`]; the test driver uses the sender to inject the
/// call's return value, and the stub's receiver hands that value back to
/// the function under test.
///
/// Both halves are consumed by use, so injecting two returns for one call,
/// or reading one return twice, is a compile error rather than a runtime
/// hazard.  The value itself crosses over a [`OneShot`], so a premature
/// read blocks (bounded by its timeout) until the injection happens; it
/// never observes a stale or default value.
///
/// `call` is the call's tag (see [`CallName`](crate::CallName)); it names
/// the call in every error either half can report.
///
/// The return "arity" is the type `T`: a dependency returning several
/// values uses a tuple, and a count mismatch is a type error.  A dependency
/// returning nothing simply has no reply channel.
pub fn reply_channel<T>(call: &'static str) -> (ReplySender<T>, ReplyReceiver<T>) {
    let slot = OneShot::new(call);
    (
        ReplySender {
            slot: slot.clone(),
            call,
        },
        ReplyReceiver { slot, call },
    )
}

/// The injecting half of a reply channel: held by the test driver.
pub struct ReplySender<T> {
    /// The one-shot carrying the value.
    slot: OneShot<T>,
    /// Tag of the call this reply belongs to.
    call: &'static str,
}

/// The consuming half of a reply channel: held by the dependency stub.
pub struct ReplyReceiver<T> {
    /// The one-shot carrying the value.
    slot: OneShot<T>,
    /// Tag of the call this reply belongs to.
    call: &'static str,
}

/// A reply channel operation failed.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ReplyError {
    /// The injected value was not picked up within the timeout.
    ///
    /// Usually this means the function under test abandoned the call, e.g.
    /// by panicking between making the call and reading its return.
    #[error(
        "waited {} to inject a return value for the {call:?} call, \
         but nothing was waiting to receive it",
        humantime::format_duration(*timeout)
    )]
    InjectTimedOut {
        /// Tag of the call involved.
        call: &'static str,
        /// How long we waited.
        timeout: Duration,
    },

    /// No return value was injected within the timeout.
    ///
    /// Usually this means the test driver dropped the [`ReplySender`]
    /// without calling [`send`](ReplySender::send), or never retrieved the
    /// call at all.
    #[error(
        "waited {} for a return value for the {call:?} call, but none was injected",
        humantime::format_duration(*timeout)
    )]
    RecvTimedOut {
        /// Tag of the call involved.
        call: &'static str,
        /// How long we waited.
        timeout: Duration,
    },

    /// The channel was closed out from under this operation.
    #[error("the reply channel for the {call:?} call is closed")]
    Closed {
        /// Tag of the call involved.
        call: &'static str,
    },
}

impl<T> ReplySender<T> {
    /// Inject the call's return value, waiting up to [`DEFAULT_TIMEOUT`]
    /// for the stub to receive it.
    ///
    /// Consumes the sender: each call gets exactly one injected return.
    pub fn send(self, value: T) -> Result<(), ReplyError> {
        self.send_within(value, DEFAULT_TIMEOUT)
    }

    /// Inject the call's return value, waiting up to `timeout`.
    pub fn send_within(self, value: T, timeout: Duration) -> Result<(), ReplyError> {
        trace!(call = self.call, "injecting return value");
        self.slot
            .push_within(value, timeout)
            .map_err(|e| match e {
                PushError::TimedOut { .. } => ReplyError::InjectTimedOut {
                    call: self.call,
                    timeout,
                },
                PushError::Closed { .. } | PushError::Spent { .. } => {
                    ReplyError::Closed { call: self.call }
                }
                _ => ReplyError::Closed { call: self.call },
            })
    }

    /// Return the tag of the call this reply belongs to.
    pub fn call(&self) -> &'static str {
        self.call
    }
}

impl<T> ReplyReceiver<T> {
    /// Receive the call's injected return value, waiting up to
    /// [`DEFAULT_TIMEOUT`].
    ///
    /// Consumes the receiver: a reply can be read exactly once.
    pub fn recv(self) -> Result<T, ReplyError> {
        self.recv_within(DEFAULT_TIMEOUT)
    }

    /// Receive the call's injected return value, waiting up to `timeout`.
    pub fn recv_within(self, timeout: Duration) -> Result<T, ReplyError> {
        self.slot.pop_within(timeout).map_err(|e| match e {
            PopError::TimedOut { .. } => ReplyError::RecvTimedOut {
                call: self.call,
                timeout,
            },
            PopError::Closed { .. } => ReplyError::Closed { call: self.call },
            _ => ReplyError::Closed { call: self.call },
        })
    }

    /// Return the tag of the call this reply belongs to.
    pub fn call(&self) -> &'static str {
        self.call
    }
}

// Manual Debug impls (rather than derived) so that call enums holding a
// reply half can derive Debug without a `T: Debug` bound, and so the
// rendering stays short in mismatch messages.
impl<T> Debug for ReplySender<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ReplySender({:?})", self.call)
    }
}

impl<T> Debug for ReplyReceiver<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ReplyReceiver({:?})", self.call)
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

    use assert_matches::assert_matches;

    #[test]
    fn value_round_trips() {
        let (tx, rx) = reply_channel::<(String, bool)>("run_command");
        let t = thread::spawn(move || rx.recv().unwrap());
        tx.send(("ok".to_owned(), true)).unwrap();
        assert_eq!(t.join().unwrap(), ("ok".to_owned(), true));
    }

    #[test]
    fn premature_recv_times_out() {
        let (tx, rx) = reply_channel::<u32>("orphaned");
        drop(tx);
        let err = rx.recv_within(Duration::from_millis(50)).unwrap_err();
        assert_matches!(err, ReplyError::RecvTimedOut { call: "orphaned", .. });
    }

    #[test]
    fn inject_with_nobody_listening_times_out() {
        let (tx, rx) = reply_channel::<u32>("ignored");
        drop(rx);
        let err = tx.send_within(1, Duration::from_millis(50)).unwrap_err();
        assert_matches!(err, ReplyError::InjectTimedOut { call: "ignored", .. });
    }

    #[test]
    fn debug_renders_the_call_name_only() {
        let (tx, rx) = reply_channel::<u32>("fetch_command");
        assert_eq!(format!("{:?}", tx), r#"ReplySender("fetch_command")"#);
        assert_eq!(format!("{:?}", rx), r#"ReplyReceiver("fetch_command")"#);
    }
}
