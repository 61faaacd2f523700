//! Naming dependency calls.

/// A stable, human-readable tag for each dependency call.
///
/// Implement this on the enum whose variants are your dependency calls,
/// returning one fixed tag per variant.  The tag is the call's *identity*:
/// [`RelayDriver::expect_call`](crate::RelayDriver::expect_call) matches on
/// it, and relay errors use it to say which call was involved.
///
/// Tags are compared with plain string equality, so they must be unique
/// across the dependencies of one function under test.  Using the
/// dependency function's own name is the easy way to keep failure messages
/// readable.
///
/// # Example
///
/// ```
/// use call_relay::{CallName, ReplySender};
///
/// #[derive(Debug)]
/// enum Call {
///     Announce { message: String },
///     RunCommand { cmd: String, reply: ReplySender<bool> },
/// }
///
/// impl CallName for Call {
///     fn call_name(&self) -> &'static str {
///         match self {
///             Call::Announce { .. } => "announce",
///             Call::RunCommand { .. } => "run_command",
///         }
///     }
/// }
/// ```
pub trait CallName {
    /// Return this call's tag.
    fn call_name(&self) -> &'static str;
}
