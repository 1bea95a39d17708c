//! Operator-facing signals and the request envelope carried on `sigch`.
//!
//! A [`Signal`] is a symbolic command, not an OS signal: most variants
//! translate one-to-one to an OS signal delivered to the child, but
//! [`Signal::Down`], [`Signal::Restart`], [`Signal::Kill`] and
//! [`Signal::Up`] are interpreted against the supervisor's state
//! machine first.

use std::fmt;

use tokio::sync::oneshot;

use crate::error::SupervisorError;

/// Symbolic signal sent to the supervisor to affect the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Alrm,
    Cont,
    /// Stop the child and keep it down.
    Down,
    Hup,
    /// Stop the child and start it again immediately.
    Restart,
    Interrupt,
    Ttin,
    /// SIGKILL the child and keep it down.
    Kill,
    Ttou,
    Stop,
    Quit,
    /// Start the child from a terminal state.
    Up,
    Usr1,
    Usr2,
    Winch,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Alrm => "ALRM",
            Signal::Cont => "CONT",
            Signal::Down => "DOWN",
            Signal::Hup => "HUP",
            Signal::Restart => "RESTART",
            Signal::Interrupt => "INTERRUPT",
            Signal::Ttin => "TTIN",
            Signal::Kill => "KILL",
            Signal::Ttou => "TTOU",
            Signal::Stop => "STOP",
            Signal::Quit => "QUIT",
            Signal::Up => "UP",
            Signal::Usr1 => "USR1",
            Signal::Usr2 => "USR2",
            Signal::Winch => "WINCH",
        };
        f.write_str(s)
    }
}

/// One operator request: the signal plus a capacity-1 reply channel so
/// the event loop never blocks on reply delivery.
pub(crate) struct SignalRequest {
    pub(crate) signal: Signal,
    pub(crate) reply: oneshot::Sender<Result<(), SupervisorError>>,
}
