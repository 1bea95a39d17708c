//! # Process lifecycle states.
//!
//! [`ProcessState`] is the single source of truth for how the next child
//! exit will be interpreted: an exit reaped while the state is
//! [`ProcessState::Stopping`] means "the operator asked for this", while
//! the same exit reaped under [`ProcessState::Running`] means "the
//! program died on its own".
//!
//! State transitions happen only inside the supervisor's event loop;
//! readers observe the current value through
//! [`Supervisor::process_state`](crate::Supervisor::process_state).

use std::fmt;

/// Lifecycle state of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No child is running; the last one was stopped on request.
    Stopped,
    /// A spawn has been scheduled but has not completed yet.
    Starting,
    /// The child is alive and being supervised.
    Running,
    /// The child was asked to terminate and will be started again.
    Restarting,
    /// The child was asked to terminate and will stay down.
    Stopping,
    /// The child was sent SIGKILL and will stay down.
    Killing,
    /// The supervisor itself is shutting down and takes the child with it.
    Terminating,
    /// The child exited on its own.
    Exited,
    /// The child was killed on request.
    Killed,
    /// The supervisor hit a protocol error and gave up.
    Fatal,
    /// Initial / indeterminate state.
    Unknown,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Restarting => "RESTARTING",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Killing => "KILLING",
            ProcessState::Terminating => "TERMINATING",
            ProcessState::Exited => "EXITED",
            ProcessState::Killed => "KILLED",
            ProcessState::Fatal => "FATAL",
            ProcessState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}
